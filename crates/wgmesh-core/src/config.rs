//! Configuration system for wgmesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WGMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/wgmesh/config.toml
//!   3. ~/.config/wgmesh/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub reconcile: ReconcileConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Tunnel interface name. Also names the mesh in the registry.
    pub interface: String,
    /// Address other nodes use to reach this one, `host:port`.
    /// The port is also the tunnel listen port.
    pub endpoint: String,
    /// This node's address inside the mesh.
    pub address: String,
    /// Prefix length assigned with `address` on the tunnel link.
    pub prefix_len: u8,
    /// Private key file. Generated on first run.
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// SQLite file shared by every node of the mesh.
    #[default]
    Sqlite,
    /// Process-local. Only useful for a single node.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    /// Database path for the sqlite backend.
    pub path: PathBuf,
}

/// Which destinations each tunnel peer may route for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedIpsPolicy {
    /// Only the peer's own mesh address, as a host route.
    #[default]
    PeerAddress,
    /// `0.0.0.0/0` for every peer.
    AllRoutes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Sleep between polls when membership is unchanged.
    pub poll_interval_secs: u64,
    pub allowed_ips: AllowedIpsPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local status endpoint port. 0 = disabled.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interface: "wgmesh0".to_string(),
            endpoint: String::new(),
            address: String::new(),
            prefix_len: 24,
            private_key_path: config_dir().join("private.key"),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Sqlite,
            path: data_dir().join("registry.db"),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            allowed_ips: AllowedIpsPolicy::PeerAddress,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 7420 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("wgmesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("wgmesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("endpoint must be <host>:<port>, like 192.168.1.3:51820, got {0:?}")]
    InvalidEndpoint(String),
    #[error("invalid mesh address {0:?}: {1}")]
    InvalidAddress(String, std::net::AddrParseError),
    #[error("invalid prefix length /{0} for {1}")]
    InvalidPrefix(u8, std::net::IpAddr),
    #[error("interface name must be 1-15 characters, got {0:?}")]
    InvalidInterface(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WGMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply WGMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WGMESH_NODE__INTERFACE") {
            self.node.interface = v;
        }
        if let Ok(v) = std::env::var("WGMESH_NODE__ENDPOINT") {
            self.node.endpoint = v;
        }
        if let Ok(v) = std::env::var("WGMESH_NODE__ADDRESS") {
            self.node.address = v;
        }
        if let Ok(v) = std::env::var("WGMESH_NODE__PRIVATE_KEY_PATH") {
            self.node.private_key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WGMESH_REGISTRY__PATH") {
            self.registry.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WGMESH_RECONCILE__POLL_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.reconcile.poll_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("WGMESH_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}
