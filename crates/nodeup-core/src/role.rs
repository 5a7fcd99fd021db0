//! Node role and deploy mode axes.
//!
//! [`RoleConfiguration::for_role`] is the only place that branches on
//! [`NodeRole`]. Renderers and the lifecycle manager consume the derived
//! policy values, never the role itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Operational profile of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Signs blocks. Keeps its address private behind sentries.
    Validator,
    /// Public-facing relay shielding validators.
    Sentry,
    /// Serves user RPC with bounded retention.
    Rpc,
    /// Serves full history.
    Archive,
}

impl NodeRole {
    /// All roles in declaration order.
    pub const ALL: [Self; 4] = [Self::Validator, Self::Sentry, Self::Rpc, Self::Archive];

    /// Lowercase identifier used in config files and CLI flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validator => "validator",
            Self::Sentry => "sentry",
            Self::Rpc => "rpc",
            Self::Archive => "archive",
        }
    }

    /// Whether this node signs blocks.
    #[must_use]
    pub const fn is_validator(self) -> bool {
        matches!(self, Self::Validator)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validator" => Ok(Self::Validator),
            "sentry" => Ok(Self::Sentry),
            "rpc" => Ok(Self::Rpc),
            "archive" => Ok(Self::Archive),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown node role '{other}' (expected validator, sentry, rpc or archive)"
            ))),
        }
    }
}

/// How the three node processes are deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Native binaries under `bin/`, supervised by `nodeup start`.
    Binary,
    /// Container images run through a compose manifest.
    Container,
}

impl DeployMode {
    /// Lowercase identifier used in config files and CLI flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "container" | "docker" => Ok(Self::Container),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown deploy mode '{other}' (expected binary or container)"
            ))),
        }
    }
}

/// Retention value meaning "keep every block".
pub const RETAIN_ALL: u64 = 0;

/// Block retention for RPC nodes.
pub const RPC_RETAIN_BLOCKS: u64 = 100_000;

/// Role-derived policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfiguration {
    /// Consensus peer-exchange reactor enabled.
    pub peer_exchange_enabled: bool,
    /// Reject non-routable peer addresses.
    pub address_book_strict: bool,
    /// Slashing evidence submission enabled. Always off by default; the
    /// operator must opt in outside of nodeup.
    pub slashing_enabled: bool,
    /// Blocks to retain; [`RETAIN_ALL`] keeps everything.
    pub retain_blocks: u64,
}

impl RoleConfiguration {
    /// Derives policy values for a role.
    #[must_use]
    pub const fn for_role(role: NodeRole) -> Self {
        match role {
            NodeRole::Validator => Self {
                peer_exchange_enabled: false,
                address_book_strict: false,
                slashing_enabled: false,
                retain_blocks: RETAIN_ALL,
            },
            NodeRole::Sentry => Self {
                peer_exchange_enabled: true,
                address_book_strict: false,
                slashing_enabled: false,
                retain_blocks: RETAIN_ALL,
            },
            NodeRole::Rpc => Self {
                peer_exchange_enabled: true,
                address_book_strict: true,
                slashing_enabled: false,
                retain_blocks: RPC_RETAIN_BLOCKS,
            },
            NodeRole::Archive => Self {
                peer_exchange_enabled: true,
                address_book_strict: true,
                slashing_enabled: false,
                retain_blocks: RETAIN_ALL,
            },
        }
    }

    /// Whether the node keeps full history.
    #[must_use]
    pub const fn retains_all(&self) -> bool {
        self.retain_blocks == RETAIN_ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_table() {
        let expected = [
            (NodeRole::Validator, false, false, false, 0),
            (NodeRole::Sentry, true, false, false, 0),
            (NodeRole::Rpc, true, true, false, 100_000),
            (NodeRole::Archive, true, true, false, 0),
        ];
        for (role, pex, strict, slashing, retain) in expected {
            let cfg = RoleConfiguration::for_role(role);
            assert_eq!(cfg.peer_exchange_enabled, pex, "{role} pex");
            assert_eq!(cfg.address_book_strict, strict, "{role} addr_book_strict");
            assert_eq!(cfg.slashing_enabled, slashing, "{role} slashing");
            assert_eq!(cfg.retain_blocks, retain, "{role} retain_blocks");
        }
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("RPC".parse::<NodeRole>().unwrap(), NodeRole::Rpc);
        assert_eq!(" archive ".parse::<NodeRole>().unwrap(), NodeRole::Archive);
        assert!("miner".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("docker".parse::<DeployMode>().unwrap(), DeployMode::Container);
        assert_eq!("binary".parse::<DeployMode>().unwrap(), DeployMode::Binary);
        assert!("k8s".parse::<DeployMode>().is_err());
    }
}
