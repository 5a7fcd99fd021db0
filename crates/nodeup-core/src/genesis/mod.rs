//! Genesis resolution for both chain layers.
//!
//! The consensus and execution layers each need a genesis document, and the
//! two must describe the same network. Each document is obtained at most once
//! per installation: presence of the file short-circuits every other source.
//!
//! A node that synthesizes its consensus genesis while fetching the execution
//! genesis from the network has created a private chain on top of a public
//! state. That is only sensible for the first validator of a new network, so
//! the combination is reported for every other role.

mod consensus;
mod document;
mod execution;

use std::path::PathBuf;

use tracing::warn;

pub use self::consensus::{ConsensusGenesis, ConsensusGenesisResolver, ConsensusGenesisSource};
pub use self::document::{GenesisDocument, SYNTHESIZED_POWER, synthesize};
pub use self::execution::{ExecutionGenesisSource, resolve_execution_genesis};
use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::fs::remove_if_exists;
use crate::http::HttpFetch;
use crate::layout::InstallationLayout;
use crate::release::LazyRelease;

/// The agreed chain identity of an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIdentity {
    /// Chain id carried by the consensus genesis.
    pub chain_id: String,
    /// Consensus genesis path.
    pub consensus_genesis: PathBuf,
    /// Execution genesis path.
    pub execution_genesis: PathBuf,
}

/// Result of resolving both genesis documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisResolution {
    /// Chain identity after resolution.
    pub chain: ChainIdentity,
    /// Consensus genesis source.
    pub consensus: ConsensusGenesisSource,
    /// Execution genesis source.
    pub execution: ExecutionGenesisSource,
    /// Non-fatal inconsistencies detected during resolution.
    pub warnings: Vec<String>,
}

/// Resolves both genesis documents and cross-checks their provenance.
///
/// # Errors
///
/// Propagates errors from either resolver. A consensus genesis obtained by
/// this call is removed again when the execution genesis cannot be resolved,
/// so a retry starts from the same sources.
pub fn resolve_genesis(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    fetcher: &dyn HttpFetch,
    release: &mut LazyRelease<'_>,
) -> Result<GenesisResolution> {
    let consensus = ConsensusGenesisResolver::new(layout, config, fetcher).resolve()?;
    let execution = match resolve_execution_genesis(layout, config, fetcher, release) {
        Ok(execution) => execution,
        Err(e) => {
            if consensus.source != ConsensusGenesisSource::Existing {
                warn!(error = %e, "execution genesis unavailable, discarding new consensus genesis");
                remove_if_exists(&layout.consensus_genesis())?;
            }
            return Err(e);
        },
    };

    let mut warnings = Vec::new();
    if consensus.source == ConsensusGenesisSource::Synthesized
        && !config.role.is_validator()
        && execution.is_fetched()
    {
        let message = format!(
            "consensus genesis was synthesized locally for a {} node while the execution \
             genesis was fetched from the network; this node is on a private chain '{}' and \
             will not sync with the network",
            config.role, consensus.chain_id
        );
        warn!(role = %config.role, chain_id = %consensus.chain_id, "{message}");
        warnings.push(message);
    }

    Ok(GenesisResolution {
        chain: ChainIdentity {
            chain_id: consensus.chain_id,
            consensus_genesis: layout.consensus_genesis(),
            execution_genesis: layout.execution_genesis(),
        },
        consensus: consensus.source,
        execution,
        warnings,
    })
}
