//! Registry contract — the shared store of peer records for each mesh.
//!
//! A registry holds one record per (interface, public key). Nodes only ever
//! write their own record. Implementations must tolerate many nodes calling
//! concurrently; reads may be stale, but a node must see its own prior
//! `join`/`leave`.

use async_trait::async_trait;
use thiserror::Error;
use wgmesh_core::Peer;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Publish `peer` under `interface`, replacing any record with the same key.
    async fn join(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError>;

    /// Remove the record for `peer`'s key. Absence is not an error.
    async fn leave(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError>;

    /// Every record currently registered under `interface`, in no particular order.
    async fn peers(&self, interface: &str) -> Result<Vec<Peer>, RegistryError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("malformed record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}
