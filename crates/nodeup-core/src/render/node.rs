//! Bridge and execution engine configuration.

use serde::{Deserialize, Serialize};

use super::RenderContext;
use crate::error::{Error, Result};
use crate::process::ProcessKind;

/// Contents of `config/bridge.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Chain id the bridge builds blocks for.
    pub chain_id: String,
    /// Address the consensus engine connects to.
    pub listen_addr: String,
    /// Authenticated Engine API of the execution engine.
    pub engine_url: String,
    /// Execution JSON-RPC endpoint.
    pub eth_url: String,
    /// Secret shared with the execution engine.
    pub jwt_secret_path: String,
    /// Bridge state directory.
    pub data_dir: String,
    /// Whether misbehaviour evidence is turned into slashing.
    pub slashing_enabled: bool,
}

/// Renders `config/bridge.toml`.
///
/// # Errors
///
/// Returns `Serialization` if encoding fails.
pub fn render_bridge_config(ctx: &RenderContext<'_>) -> Result<String> {
    let ports = &ctx.config.ports;
    let execution = ctx.host_of(ProcessKind::Execution);
    let document = BridgeConfig {
        chain_id: ctx.chain_id.to_string(),
        listen_addr: format!("tcp://{}:{}", ctx.bind_host(), ports.bridge),
        engine_url: format!("http://{execution}:{}", ports.execution_auth),
        eth_url: format!("http://{execution}:{}", ports.execution_http),
        jwt_secret_path: ctx.layout.auth_secret().display().to_string(),
        data_dir: ctx.layout.data_dir(ProcessKind::Bridge).display().to_string(),
        slashing_enabled: ctx.role.slashing_enabled,
    };
    toml::to_string(&document).map_err(|e| Error::serialization("bridge.toml", e))
}

/// Contents of `config/execution.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Execution state directory.
    pub datadir: String,
    /// Execution genesis document.
    pub genesis: String,
    /// Secret shared with the bridge.
    pub jwt_secret: String,
    /// Listener addresses and ports.
    pub rpc: ExecutionRpc,
    /// P2P settings.
    pub p2p: ExecutionP2p,
    /// State pruning.
    pub pruning: Pruning,
}

/// Execution RPC listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRpc {
    /// Bind address of the public HTTP and WS listeners.
    pub addr: String,
    /// HTTP JSON-RPC port.
    pub http_port: u16,
    /// WebSocket JSON-RPC port.
    pub ws_port: u16,
    /// Bind address of the Engine API.
    pub authrpc_addr: String,
    /// Engine API port.
    pub authrpc_port: u16,
}

/// Execution P2P settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionP2p {
    /// Listen port.
    pub port: u16,
}

/// Execution pruning policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pruning {
    /// `archive` or `full`.
    pub mode: String,
    /// Recent blocks kept in `full` mode; 0 in archive mode.
    pub distance: u64,
}

/// Renders `config/execution.toml`.
///
/// # Errors
///
/// Returns `Serialization` if encoding fails.
pub fn render_execution_config(ctx: &RenderContext<'_>) -> Result<String> {
    let ports = &ctx.config.ports;
    let layout = ctx.layout;
    let pruning = if ctx.role.retains_all() {
        Pruning {
            mode: "archive".to_string(),
            distance: 0,
        }
    } else {
        Pruning {
            mode: "full".to_string(),
            distance: ctx.role.retain_blocks,
        }
    };

    let document = ExecutionConfig {
        datadir: layout.data_dir(ProcessKind::Execution).display().to_string(),
        genesis: layout.execution_genesis().display().to_string(),
        jwt_secret: layout.auth_secret().display().to_string(),
        rpc: ExecutionRpc {
            addr: "0.0.0.0".to_string(),
            http_port: ports.execution_http,
            ws_port: ports.execution_ws,
            authrpc_addr: ctx.bind_host().to_string(),
            authrpc_port: ports.execution_auth,
        },
        p2p: ExecutionP2p {
            port: ports.execution_p2p,
        },
        pruning,
    };
    toml::to_string(&document).map_err(|e| Error::serialization("execution.toml", e))
}
