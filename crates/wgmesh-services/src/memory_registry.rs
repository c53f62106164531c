//! In-process registry. Clones share the same table, so several
//! `LocalNode`s in one process see each other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use wgmesh_core::{Peer, PublicKey};

use crate::registry::{Registry, RegistryError};

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    /// interface → public key → record
    meshes: Arc<DashMap<String, HashMap<PublicKey, Peer>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records under `interface`.
    pub fn count(&self, interface: &str) -> usize {
        self.meshes.get(interface).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn join(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError> {
        self.meshes
            .entry(interface.to_string())
            .or_default()
            .insert(peer.public_key, peer.clone());
        Ok(())
    }

    async fn leave(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError> {
        if let Some(mut mesh) = self.meshes.get_mut(interface) {
            mesh.remove(&peer.public_key);
        }
        Ok(())
    }

    async fn peers(&self, interface: &str) -> Result<Vec<Peer>, RegistryError> {
        Ok(self
            .meshes
            .get(interface)
            .map(|mesh| mesh.values().cloned().collect())
            .unwrap_or_default())
    }
}
