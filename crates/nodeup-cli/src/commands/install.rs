//! `nodeup install`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nodeup_core::config::BootstrapConfig;
use nodeup_core::genesis::ConsensusGenesisSource;
use nodeup_core::platform::Platform;
use nodeup_core::release::HttpArtifactSource;
use nodeup_core::{DeployMode, InstallationLayout, Installer, NodeRole};

/// Flags overlaid on the configuration file for an install.
#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// Node role: validator, sentry, rpc or archive
    #[arg(long, env = "NODEUP_ROLE")]
    pub role: Option<NodeRole>,

    /// Deploy mode: binary or container
    #[arg(long, env = "NODEUP_MODE")]
    pub mode: Option<DeployMode>,

    /// Node name
    #[arg(long, env = "NODEUP_MONIKER")]
    pub moniker: Option<String>,

    /// Chain id used when a new network is created
    #[arg(long, env = "NODEUP_CHAIN_ID")]
    pub chain_id: Option<String>,

    /// Release tag to install, or `latest`
    #[arg(long = "release", env = "NODEUP_RELEASE")]
    pub release: Option<String>,

    /// Release tag used when `latest` cannot be resolved
    #[arg(long, env = "NODEUP_FALLBACK_RELEASE")]
    pub fallback_release: Option<String>,

    /// Consensus genesis URL for joining an existing network
    #[arg(long, env = "NODEUP_GENESIS_URL")]
    pub genesis_url: Option<String>,

    /// Execution genesis URL (defaults to the release's genesis.json)
    #[arg(long, env = "NODEUP_EXECUTION_GENESIS_URL")]
    pub execution_genesis_url: Option<String>,

    /// Persistent peer, `<node-id>@<host>:<port>` (repeatable)
    #[arg(long = "peer", env = "NODEUP_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Fail instead of creating a local network when no peer serves genesis
    #[arg(long)]
    pub require_peer_genesis: bool,

    /// Write the effective configuration to this path after installing
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

impl InstallArgs {
    fn apply(&self, config: &mut BootstrapConfig) {
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(moniker) = &self.moniker {
            config.moniker.clone_from(moniker);
        }
        if let Some(chain_id) = &self.chain_id {
            config.chain_id.clone_from(chain_id);
        }
        if let Some(release) = &self.release {
            config.release.version.clone_from(release);
        }
        if self.fallback_release.is_some() {
            config.release.fallback_version.clone_from(&self.fallback_release);
        }
        if self.genesis_url.is_some() {
            config.network.genesis_url.clone_from(&self.genesis_url);
        }
        if self.execution_genesis_url.is_some() {
            config
                .network
                .execution_genesis_url
                .clone_from(&self.execution_genesis_url);
        }
        if !self.peers.is_empty() {
            config.network.peers.clone_from(&self.peers);
        }
        if self.require_peer_genesis {
            config.network.require_peer_genesis = true;
        }
    }
}

/// Runs the install.
pub fn run(mut config: BootstrapConfig, args: &InstallArgs) -> Result<()> {
    args.apply(&mut config);

    let layout = InstallationLayout::new(&config.home);
    let fetcher = super::fetcher()?;
    let platform = Platform::detect().context("unsupported host platform")?;
    let artifacts = HttpArtifactSource::new(fetcher.clone(), platform, config.timeouts.artifact);
    let engine = super::engine(&config);

    let report = Installer::new(&layout, &config, fetcher.as_ref(), &artifacts, &engine)
        .install()
        .with_context(|| format!("install failed in {}", layout.root().display()))?;

    for warning in &report.genesis.warnings {
        eprintln!("warning: {warning}");
    }

    if report.is_noop() {
        println!("Installation at {} is up to date", layout.root().display());
    } else {
        let genesis = match report.genesis.consensus {
            ConsensusGenesisSource::Existing => "existing",
            ConsensusGenesisSource::ExplicitUrl => "fetched from genesis URL",
            ConsensusGenesisSource::Peer => "fetched from peer",
            ConsensusGenesisSource::Synthesized => "created for a new network",
        };
        println!(
            "Installed {} {} node {} at {}",
            config.role,
            config.mode,
            report.version,
            layout.root().display()
        );
        println!("  chain id:  {} (genesis {genesis})", report.genesis.chain.chain_id);
        println!("  binaries:  {} downloaded", report.binaries_fetched.len());
        println!("  images:    {} pulled", report.images_pulled.len());
        println!(
            "  identity:  {}",
            if report.identity.keys_generated {
                "generated"
            } else {
                "existing"
            }
        );
        println!("Start it with {}", layout.start_script().display());
    }

    if let Some(path) = &args.save_config {
        let content = config
            .to_toml()
            .context("failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let mut config = BootstrapConfig::default();
        let args = InstallArgs {
            role: Some(NodeRole::Sentry),
            release: Some("v2.0.0".to_string()),
            peers: vec!["abcd@10.0.0.1:26656".to_string()],
            ..InstallArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.role, NodeRole::Sentry);
        assert_eq!(config.mode, DeployMode::Binary);
        assert_eq!(config.release.version, "v2.0.0");
        assert_eq!(config.network.peers, ["abcd@10.0.0.1:26656"]);
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let mut config = BootstrapConfig::default();
        config.network.genesis_url = Some("https://example.com/genesis.json".to_string());
        InstallArgs::default().apply(&mut config);
        assert_eq!(
            config.network.genesis_url.as_deref(),
            Some("https://example.com/genesis.json")
        );
    }
}
