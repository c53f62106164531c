//! The local node: its identity, its registry record, and (re)registration.

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use wgmesh_core::config::{ConfigError, NodeConfig};
use wgmesh_core::{keys, Endpoint, Peer, PrivateKey, PublicKey};

use crate::error::{MeshError, Phase};
use crate::registry::{Registry, RegistryError};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
const MAX_INTERFACE_LEN: usize = 15;

/// This node's view of itself. Built once at startup, never mutated.
pub struct LocalNode {
    registry: Arc<dyn Registry>,
    interface: String,
    private_key: PrivateKey,
    peer: Peer,
    network: IpNet,
}

impl LocalNode {
    /// Validate configuration and assemble the node. Does not touch the registry.
    pub fn new(
        registry: Arc<dyn Registry>,
        interface: &str,
        endpoint: &str,
        address: &str,
        prefix_len: u8,
        private_key: PrivateKey,
    ) -> Result<Self, MeshError> {
        if interface.is_empty() || interface.len() > MAX_INTERFACE_LEN {
            return Err(ConfigError::InvalidInterface(interface.to_string()).into());
        }
        let endpoint: Endpoint = endpoint.parse()?;
        let ip: IpAddr = address
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(address.to_string(), e))?;
        let network =
            IpNet::new(ip, prefix_len).map_err(|_| ConfigError::InvalidPrefix(prefix_len, ip))?;

        let peer = Peer {
            public_key: private_key.public_key(),
            endpoint,
            address: ip,
        };
        Ok(Self {
            registry,
            interface: interface.to_string(),
            private_key,
            peer,
            network,
        })
    }

    /// Build from config, loading (or first generating) the key file.
    pub fn from_config(registry: Arc<dyn Registry>, config: &NodeConfig) -> Result<Self, MeshError> {
        // Validate the cheap things before creating a key file.
        config.endpoint.parse::<Endpoint>()?;
        let private_key = keys::load_or_generate(&config.private_key_path)?;
        Self::new(
            registry,
            &config.interface,
            &config.endpoint,
            &config.address,
            config.prefix_len,
            private_key,
        )
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn public_key(&self) -> PublicKey {
        self.peer.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Mesh address with its prefix, as assigned to the link.
    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Current registry membership for this node's mesh.
    pub async fn fetch_peers(&self) -> Result<Vec<Peer>, RegistryError> {
        self.registry.peers(&self.interface).await
    }

    /// The identity already holding this node's address, if any.
    /// A record with our own key is a rejoin, not a conflict.
    pub async fn conflicting_holder(&self) -> Result<Option<PublicKey>, RegistryError> {
        let peers = self.fetch_peers().await?;
        Ok(peers
            .iter()
            .find(|p| p.conflicts_with(&self.peer))
            .map(|p| p.public_key))
    }

    pub async fn address_already_taken(&self) -> Result<bool, RegistryError> {
        Ok(self.conflicting_holder().await?.is_some())
    }

    /// Conflict check, then leave-then-join.
    ///
    /// The leave clears a record left behind by a crashed earlier run and may
    /// fail harmlessly when there is none.
    pub async fn register(&self) -> Result<(), MeshError> {
        let holder = self
            .conflicting_holder()
            .await
            .map_err(|e| MeshError::registry(Phase::ConflictCheck, e))?;
        if let Some(holder) = holder {
            return Err(MeshError::AddressConflict {
                address: self.peer.address,
                holder,
            });
        }

        if let Err(e) = self.registry.leave(&self.interface, &self.peer).await {
            tracing::warn!(error = %e, interface = %self.interface, "leave before join failed, continuing");
        }

        self.registry
            .join(&self.interface, &self.peer)
            .await
            .map_err(|e| MeshError::registry(Phase::Registration, e))?;

        tracing::info!(
            interface = %self.interface,
            public_key = %self.peer.public_key,
            address = %self.peer.address,
            endpoint = %self.peer.endpoint,
            "registered"
        );
        Ok(())
    }

    /// Remove this node's record. Used on graceful shutdown.
    pub async fn deregister(&self) -> Result<(), MeshError> {
        self.registry
            .leave(&self.interface, &self.peer)
            .await
            .map_err(|e| MeshError::registry(Phase::Registration, e))?;
        tracing::info!(interface = %self.interface, "deregistered");
        Ok(())
    }
}
