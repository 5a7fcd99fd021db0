//! Consensus engine `config.toml`.

use serde::Serialize;

use super::RenderContext;
use crate::error::{Error, Result};
use crate::process::ProcessKind;

#[derive(Debug, Serialize)]
struct ConsensusConfig {
    moniker: String,
    proxy_app: String,
    db_backend: &'static str,
    db_dir: String,
    log_level: &'static str,
    log_format: &'static str,
    genesis_file: String,
    priv_validator_key_file: String,
    priv_validator_state_file: String,
    node_key_file: String,
    rpc: RpcSection,
    p2p: P2pSection,
    storage: StorageSection,
    instrumentation: InstrumentationSection,
}

#[derive(Debug, Serialize)]
struct RpcSection {
    laddr: String,
    cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Serialize)]
struct P2pSection {
    laddr: String,
    external_address: String,
    persistent_peers: String,
    pex: bool,
    addr_book_strict: bool,
    addr_book_file: String,
}

#[derive(Debug, Serialize)]
struct StorageSection {
    discard_abci_responses: bool,
    retain_blocks: u64,
}

#[derive(Debug, Serialize)]
struct InstrumentationSection {
    prometheus: bool,
}

/// Renders the consensus engine configuration.
///
/// # Errors
///
/// Returns `InvalidConfiguration` for a malformed peer list and
/// `Serialization` if encoding fails.
pub fn render_consensus_config(ctx: &RenderContext<'_>) -> Result<String> {
    let layout = ctx.layout;
    let config = ctx.config;
    let ports = &config.ports;
    let data_dir = layout.data_dir(ProcessKind::Consensus);

    let persistent_peers = config
        .peers()?
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let document = ConsensusConfig {
        moniker: config.moniker.clone(),
        proxy_app: format!(
            "tcp://{}:{}",
            ctx.host_of(ProcessKind::Bridge),
            ports.bridge
        ),
        db_backend: "goleveldb",
        db_dir: data_dir.join("db").display().to_string(),
        log_level: "info",
        log_format: "plain",
        genesis_file: layout.consensus_genesis().display().to_string(),
        priv_validator_key_file: layout.validator_key().display().to_string(),
        priv_validator_state_file: layout.validator_state().display().to_string(),
        node_key_file: layout.node_key().display().to_string(),
        rpc: RpcSection {
            laddr: format!("tcp://0.0.0.0:{}", ports.consensus_rpc),
            cors_allowed_origins: Vec::new(),
        },
        p2p: P2pSection {
            laddr: format!("tcp://0.0.0.0:{}", ports.consensus_p2p),
            external_address: config.network.external_address.clone().unwrap_or_default(),
            persistent_peers,
            pex: ctx.role.peer_exchange_enabled,
            addr_book_strict: ctx.role.address_book_strict,
            addr_book_file: layout
                .consensus_config_dir()
                .join("addrbook.json")
                .display()
                .to_string(),
        },
        storage: StorageSection {
            discard_abci_responses: !ctx.role.retains_all(),
            retain_blocks: ctx.role.retain_blocks,
        },
        instrumentation: InstrumentationSection { prometheus: false },
    };

    toml::to_string(&document).map_err(|e| Error::serialization("consensus config.toml", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::layout::InstallationLayout;
    use crate::role::{DeployMode, NodeRole};

    #[test]
    fn test_consensus_config_contents() {
        let layout = InstallationLayout::new("/srv/node");
        let mut config = BootstrapConfig {
            home: "/srv/node".into(),
            role: NodeRole::Rpc,
            moniker: "rpc-1".to_string(),
            ..BootstrapConfig::default()
        };
        config.network.peers = vec!["AA@10.0.0.1:26656".to_string()];
        config.network.external_address = Some("203.0.113.7:26656".to_string());

        let ctx = RenderContext::new(&layout, &config, "chain-1", "v1.0.0");
        let rendered: toml::Value = toml::from_str(&render_consensus_config(&ctx).unwrap()).unwrap();

        assert_eq!(rendered["moniker"].as_str(), Some("rpc-1"));
        assert_eq!(rendered["proxy_app"].as_str(), Some("tcp://127.0.0.1:26658"));
        assert_eq!(
            rendered["genesis_file"].as_str(),
            Some("/srv/node/config/consensus/config/genesis.json")
        );
        assert_eq!(
            rendered["p2p"]["persistent_peers"].as_str(),
            Some("aa@10.0.0.1:26656")
        );
        assert_eq!(
            rendered["p2p"]["external_address"].as_str(),
            Some("203.0.113.7:26656")
        );
        assert_eq!(rendered["storage"]["retain_blocks"].as_integer(), Some(100_000));
    }

    #[test]
    fn test_container_mode_reaches_bridge_by_service_name() {
        let layout = InstallationLayout::new("/srv/node");
        let config = BootstrapConfig {
            mode: DeployMode::Container,
            ..BootstrapConfig::default()
        };
        let ctx = RenderContext::new(&layout, &config, "chain-1", "v1.0.0");
        let rendered = render_consensus_config(&ctx).unwrap();
        assert!(rendered.contains("proxy_app = \"tcp://bridge:26658\""), "{rendered}");
    }
}
