//! Peer records as published to the registry.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::keys::PublicKey;

/// A reachable `host:port` pair.
///
/// The host is kept as text; the tunnel device resolves it. Exactly one `:`
/// separator is accepted, so bracketed IPv6 literals are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [host, port] = parts.as_slice() else {
            return Err(ConfigError::InvalidEndpoint(s.to_string()));
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A mesh participant's public identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Tunnel public key. Unique per node.
    pub public_key: PublicKey,
    /// Where other nodes reach this one.
    pub endpoint: Endpoint,
    /// Address inside the mesh's private address space.
    pub address: IpAddr,
}

impl Peer {
    /// Same address held by a different identity.
    pub fn conflicts_with(&self, other: &Peer) -> bool {
        self.address == other.address && self.public_key != other.public_key
    }
}
