//! Configuration parsing and management.
//!
//! A [`BootstrapConfig`] is built exactly once per command, from an optional
//! TOML file overlaid with command-line flags, and then passed by reference to
//! every component. No component reads the process environment on its own.

mod peer;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use self::peer::Peer;
use crate::backoff::ReadinessConfig;
use crate::error::Error;
use crate::role::{DeployMode, NodeRole};

/// Default chain identifier for a freshly synthesized network.
pub const DEFAULT_CHAIN_ID: &str = "nodeup-local-1";

/// Top-level bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Installation root.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Node role; immutable once installed.
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// Deploy mode; immutable once installed.
    #[serde(default = "default_mode")]
    pub mode: DeployMode,

    /// Human-readable node name embedded in consensus metadata.
    #[serde(default = "default_moniker")]
    pub moniker: String,

    /// Chain id used when genesis is synthesized. A fetched genesis
    /// overrides it.
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Genesis sources and peers.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Release resolution.
    #[serde(default)]
    pub release: ReleaseConfig,

    /// Listen ports for the three processes.
    #[serde(default)]
    pub ports: PortsConfig,

    /// Timeouts for network calls and shutdown.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Readiness polling between process launches.
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            role: default_role(),
            mode: default_mode(),
            moniker: default_moniker(),
            chain_id: default_chain_id(),
            network: NetworkConfig::default(),
            release: ReleaseConfig::default(),
            ports: PortsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or names unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Parsed peer list, in configured order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a malformed peer descriptor.
    pub fn peers(&self) -> Result<Vec<Peer>, Error> {
        self.network
            .peers
            .iter()
            .map(|p| p.parse::<Peer>())
            .collect()
    }

    /// Checks the configuration for values that can never work. Performed
    /// before any mutation of the installation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.home.as_os_str().is_empty() {
            return Err(invalid("home must not be empty"));
        }
        if self.moniker.trim().is_empty() {
            return Err(invalid("moniker must not be empty"));
        }
        validate_chain_id(&self.chain_id)?;
        self.peers()?;

        for (field, url) in [
            ("network.genesis_url", self.network.genesis_url.as_deref()),
            (
                "network.execution_genesis_url",
                self.network.execution_genesis_url.as_deref(),
            ),
            (
                "release.artifact_base_url",
                Some(self.release.artifact_base_url.as_str()),
            ),
            ("release.api_url", Some(self.release.api_url.as_str())),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid(&format!(
                        "{field} must be an http(s) URL, got '{url}'"
                    )));
                }
            }
        }

        if self.release.version.trim().is_empty() {
            return Err(invalid("release.version must not be empty"));
        }
        if self.mode == DeployMode::Container && self.release.image_registry.trim().is_empty() {
            return Err(invalid("release.image_registry is required in container mode"));
        }

        self.ports.validate()?;

        if self.readiness.max_attempts == 0 {
            return Err(invalid("readiness.max_attempts must be at least 1"));
        }
        self.readiness
            .backoff
            .validate()
            .map_err(|e| invalid(&format!("readiness.{e}")))?;
        Ok(())
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidConfiguration(msg.to_string())
}

fn validate_chain_id(chain_id: &str) -> Result<(), Error> {
    if chain_id.is_empty() || chain_id.len() > 50 {
        return Err(invalid("chain_id must be 1-50 characters"));
    }
    if !chain_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(&format!(
            "chain_id '{chain_id}' may only contain alphanumerics, '-', '_' and '.'"
        )));
    }
    Ok(())
}

fn default_home() -> PathBuf {
    PathBuf::from("/var/lib/nodeup")
}

const fn default_role() -> NodeRole {
    NodeRole::Validator
}

const fn default_mode() -> DeployMode {
    DeployMode::Binary
}

fn default_moniker() -> String {
    "nodeup-node".to_string()
}

fn default_chain_id() -> String {
    DEFAULT_CHAIN_ID.to_string()
}

/// Genesis sources and peer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Explicit consensus genesis URL. Failure to fetch it is fatal.
    #[serde(default)]
    pub genesis_url: Option<String>,

    /// Explicit execution genesis URL.
    #[serde(default)]
    pub execution_genesis_url: Option<String>,

    /// Persistent peers as `nodeid@host:port`.
    #[serde(default)]
    pub peers: Vec<String>,

    /// RPC port used to fetch genesis from the first peer.
    #[serde(default = "default_peer_rpc_port")]
    pub peer_rpc_port: u16,

    /// Make peer genesis fetch failure fatal for non-validator roles
    /// instead of falling back to synthesis.
    #[serde(default)]
    pub require_peer_genesis: bool,

    /// Externally reachable `host:port` advertised to peers.
    #[serde(default)]
    pub external_address: Option<String>,
}

const fn default_peer_rpc_port() -> u16 {
    26657
}

/// Release resolution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Release to install: a tag or `latest`.
    #[serde(default = "default_version")]
    pub version: String,

    /// Tag used when `latest` cannot be resolved.
    #[serde(default)]
    pub fallback_version: Option<String>,

    /// Release repository as `owner/name`.
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Base URL of release downloads; artifacts live under
    /// `<base>/download/<version>/`.
    #[serde(default = "default_artifact_base_url")]
    pub artifact_base_url: String,

    /// Release metadata API base.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Container registry prefix, e.g. `ghcr.io/nodeup`.
    #[serde(default = "default_image_registry")]
    pub image_registry: String,

    /// Container engine executable.
    #[serde(default = "default_container_engine")]
    pub container_engine: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            fallback_version: None,
            repository: default_repository(),
            artifact_base_url: default_artifact_base_url(),
            api_url: default_api_url(),
            image_registry: default_image_registry(),
            container_engine: default_container_engine(),
        }
    }
}

/// Version alias resolved through the release API.
pub const LATEST: &str = "latest";

fn default_version() -> String {
    LATEST.to_string()
}

fn default_repository() -> String {
    "nodeup/node".to_string()
}

fn default_artifact_base_url() -> String {
    "https://github.com/nodeup/node/releases".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_image_registry() -> String {
    "ghcr.io/nodeup".to_string()
}

fn default_container_engine() -> String {
    "docker".to_string()
}

/// Listen ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortsConfig {
    /// Consensus P2P.
    #[serde(default = "default_p2p")]
    pub consensus_p2p: u16,
    /// Consensus RPC.
    #[serde(default = "default_rpc")]
    pub consensus_rpc: u16,
    /// Bridge application socket the consensus engine connects to.
    #[serde(default = "default_bridge")]
    pub bridge: u16,
    /// Execution JSON-RPC over HTTP.
    #[serde(default = "default_execution_http")]
    pub execution_http: u16,
    /// Execution JSON-RPC over WebSocket.
    #[serde(default = "default_execution_ws")]
    pub execution_ws: u16,
    /// Execution authenticated Engine API.
    #[serde(default = "default_execution_auth")]
    pub execution_auth: u16,
    /// Execution P2P.
    #[serde(default = "default_execution_p2p")]
    pub execution_p2p: u16,
}

const fn default_p2p() -> u16 {
    26656
}
const fn default_rpc() -> u16 {
    26657
}
const fn default_bridge() -> u16 {
    26658
}
const fn default_execution_http() -> u16 {
    8545
}
const fn default_execution_ws() -> u16 {
    8546
}
const fn default_execution_auth() -> u16 {
    8551
}
const fn default_execution_p2p() -> u16 {
    30303
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            consensus_p2p: default_p2p(),
            consensus_rpc: default_rpc(),
            bridge: default_bridge(),
            execution_http: default_execution_http(),
            execution_ws: default_execution_ws(),
            execution_auth: default_execution_auth(),
            execution_p2p: default_execution_p2p(),
        }
    }
}

impl PortsConfig {
    fn all(&self) -> [(&'static str, u16); 7] {
        [
            ("consensus_p2p", self.consensus_p2p),
            ("consensus_rpc", self.consensus_rpc),
            ("bridge", self.bridge),
            ("execution_http", self.execution_http),
            ("execution_ws", self.execution_ws),
            ("execution_auth", self.execution_auth),
            ("execution_p2p", self.execution_p2p),
        ]
    }

    fn validate(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        for (name, port) in self.all() {
            if port == 0 {
                return Err(invalid(&format!("ports.{name} must not be 0")));
            }
            if !seen.insert(port) {
                return Err(invalid(&format!(
                    "ports.{name} = {port} collides with another port"
                )));
            }
        }
        Ok(())
    }
}

/// Timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Per-artifact download timeout.
    #[serde(default = "default_artifact_timeout", with = "humantime_serde")]
    pub artifact: Duration,

    /// Explicit genesis and release metadata fetch timeout.
    #[serde(default = "default_metadata_timeout", with = "humantime_serde")]
    pub metadata: Duration,

    /// Peer genesis fetch timeout. Bounded so synthesis stays reachable.
    #[serde(default = "default_peer_genesis_timeout", with = "humantime_serde")]
    pub peer_genesis: Duration,

    /// Grace period between SIGTERM and SIGKILL on shutdown.
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
}

const fn default_artifact_timeout() -> Duration {
    Duration::from_secs(300)
}
const fn default_metadata_timeout() -> Duration {
    Duration::from_secs(30)
}
const fn default_peer_genesis_timeout() -> Duration {
    Duration::from_secs(10)
}
const fn default_stop_grace() -> Duration {
    Duration::from_secs(30)
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            artifact: default_artifact_timeout(),
            metadata: default_metadata_timeout(),
            peer_genesis: default_peer_genesis_timeout(),
            stop_grace: default_stop_grace(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
