//! Persistent peer descriptors (`nodeid@host:port`).

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One entry of the persistent peer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Hex node id derived from the peer's node key.
    pub node_id: String,
    /// Hostname or IP address.
    pub host: String,
    /// P2P port.
    pub port: u16,
}

impl Peer {
    /// URL of the peer's genesis RPC endpoint.
    #[must_use]
    pub fn genesis_url(&self, rpc_port: u16) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{rpc_port}/genesis", self.host)
        } else {
            format!("http://{}:{rpc_port}/genesis", self.host)
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.node_id, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.node_id, self.host, self.port)
        }
    }
}

impl FromStr for Peer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| Error::InvalidConfiguration(format!("invalid peer '{s}': {why}"));

        let (node_id, addr) = s.trim().split_once('@').ok_or_else(|| bad("missing '@'"))?;
        if node_id.is_empty() || !node_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(bad("node id must be hex"));
        }

        let (host, port) = addr.rsplit_once(':').ok_or_else(|| bad("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| bad("port must be 1-65535"))?;

        Ok(Self {
            node_id: node_id.to_ascii_lowercase(),
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let peer: Peer = "ABCDEF0123@seed.example.com:26656".parse().unwrap();
        assert_eq!(peer.node_id, "abcdef0123");
        assert_eq!(peer.host, "seed.example.com");
        assert_eq!(peer.port, 26656);
        assert_eq!(peer.to_string(), "abcdef0123@seed.example.com:26656");
        assert_eq!(
            peer.genesis_url(26657),
            "http://seed.example.com:26657/genesis"
        );
    }

    #[test]
    fn test_parse_ipv6_peer() {
        let peer: Peer = "ab12@[::1]:26656".parse().unwrap();
        assert_eq!(peer.host, "::1");
        assert_eq!(peer.genesis_url(26657), "http://[::1]:26657/genesis");
        assert_eq!(peer.to_string(), "ab12@[::1]:26656");
    }

    #[test]
    fn test_reject_malformed_peers() {
        for bad in [
            "",
            "10.0.0.1:26656",
            "zz@10.0.0.1:26656",
            "ab@10.0.0.1",
            "ab@:26656",
            "ab@10.0.0.1:0",
            "ab@10.0.0.1:99999",
        ] {
            assert!(bad.parse::<Peer>().is_err(), "{bad:?} should be rejected");
        }
    }
}
