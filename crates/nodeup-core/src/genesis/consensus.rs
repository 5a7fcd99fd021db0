//! Consensus-layer genesis resolution.

use std::fs;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::document::{GenesisDocument, synthesize};
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, atomic_write};
use crate::http::HttpFetch;
use crate::identity::ValidatorKey;
use crate::layout::InstallationLayout;

/// Where the consensus genesis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusGenesisSource {
    /// Already present in the installation.
    Existing,
    /// Fetched from the configured genesis URL.
    ExplicitUrl,
    /// Fetched from the first persistent peer's RPC endpoint.
    Peer,
    /// Built locally with this node as the only validator.
    Synthesized,
}

/// Outcome of consensus genesis resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusGenesis {
    /// Where the document came from.
    pub source: ConsensusGenesisSource,
    /// Chain id carried by the document.
    pub chain_id: String,
}

/// Obtains the consensus genesis, first success wins:
/// existing file, explicit URL, first peer (non-validators only), synthesis.
pub struct ConsensusGenesisResolver<'a> {
    layout: &'a InstallationLayout,
    config: &'a BootstrapConfig,
    fetcher: &'a dyn HttpFetch,
}

impl<'a> ConsensusGenesisResolver<'a> {
    /// Creates a resolver over `layout`.
    #[must_use]
    pub fn new(
        layout: &'a InstallationLayout,
        config: &'a BootstrapConfig,
        fetcher: &'a dyn HttpFetch,
    ) -> Self {
        Self {
            layout,
            config,
            fetcher,
        }
    }

    /// Resolves and persists the consensus genesis.
    ///
    /// # Errors
    ///
    /// Returns `GenesisFetchFailed` when the explicit URL (or, with
    /// `require_peer_genesis`, the peer) fails, and `InvalidGenesisFormat`
    /// when a document does not parse.
    pub fn resolve(&self) -> Result<ConsensusGenesis> {
        let path = self.layout.consensus_genesis();
        if path.is_file() {
            let bytes =
                fs::read(&path).map_err(|e| Error::io("failed to read genesis", &path, e))?;
            let document =
                GenesisDocument::parse(&bytes).map_err(|reason| Error::InvalidGenesisFormat {
                    source_desc: path.display().to_string(),
                    reason,
                })?;
            info!(
                path = %path.display(),
                chain_id = %document.chain_id,
                "consensus genesis present, reusing"
            );
            return Ok(ConsensusGenesis {
                source: ConsensusGenesisSource::Existing,
                chain_id: document.chain_id,
            });
        }

        if let Some(url) = &self.config.network.genesis_url {
            return self.fetch(url, ConsensusGenesisSource::ExplicitUrl);
        }

        let peers = self.config.peers()?;
        if !self.config.role.is_validator() {
            if let Some(peer) = peers.first() {
                let url = peer.genesis_url(self.config.network.peer_rpc_port);
                match self.fetch(&url, ConsensusGenesisSource::Peer) {
                    Ok(genesis) => return Ok(genesis),
                    Err(e) if self.config.network.require_peer_genesis => return Err(e),
                    Err(e) => {
                        warn!(
                            %url,
                            error = %e,
                            "peer genesis unavailable, synthesizing a local genesis"
                        );
                    },
                }
            }
        }

        self.synthesize()
    }

    fn fetch(&self, url: &str, source: ConsensusGenesisSource) -> Result<ConsensusGenesis> {
        let timeout = match source {
            ConsensusGenesisSource::Peer => self.config.timeouts.peer_genesis,
            _ => self.config.timeouts.metadata,
        };
        info!(%url, ?source, "fetching consensus genesis");

        let body = self
            .fetcher
            .get(url, timeout)
            .map_err(|e| Error::GenesisFetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let document =
            GenesisDocument::extract(&body).map_err(|reason| Error::InvalidGenesisFormat {
                source_desc: url.to_string(),
                reason,
            })?;

        atomic_write(&self.layout.consensus_genesis(), document.bytes, FILE_MODE)?;
        if document.chain_id != self.config.chain_id {
            info!(
                configured = %self.config.chain_id,
                adopted = %document.chain_id,
                "adopting chain id from fetched genesis"
            );
        }
        Ok(ConsensusGenesis {
            source,
            chain_id: document.chain_id,
        })
    }

    fn synthesize(&self) -> Result<ConsensusGenesis> {
        let key = ValidatorKey::load(&self.layout.validator_key())?;
        let bytes = synthesize(&self.config.chain_id, &self.config.moniker, &key, Utc::now())?;
        atomic_write(&self.layout.consensus_genesis(), &bytes, FILE_MODE)?;
        info!(
            chain_id = %self.config.chain_id,
            validator = %key.address,
            "synthesized single-validator consensus genesis"
        );
        Ok(ConsensusGenesis {
            source: ConsensusGenesisSource::Synthesized,
            chain_id: self.config.chain_id.clone(),
        })
    }
}
