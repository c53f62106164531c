//! Engine error type. Every message starts with the phase that failed.

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;
use wgmesh_core::config::ConfigError;
use wgmesh_core::keys::KeyError;
use wgmesh_core::PublicKey;

use crate::registry::RegistryError;
use crate::tunnel::TunnelError;

/// Where in the node lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ConflictCheck,
    Registration,
    Polling,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::ConflictCheck => "conflict check",
            Phase::Registration => "registration",
            Phase::Polling => "polling",
            Phase::Apply => "apply",
        })
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("startup: configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("startup: key material: {0}")]
    KeyMaterial(#[from] KeyError),

    #[error("conflict check: address {address} already taken by {holder}")]
    AddressConflict { address: IpAddr, holder: PublicKey },

    #[error("{phase}: registry: {source}")]
    Registry {
        phase: Phase,
        #[source]
        source: RegistryError,
    },

    #[error("apply: tunnel: {0}")]
    TunnelApply(#[from] TunnelError),
}

impl MeshError {
    pub fn registry(phase: Phase, source: RegistryError) -> Self {
        MeshError::Registry { phase, source }
    }

    /// The phase this error belongs to, if it happened after startup.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            MeshError::Configuration(_) | MeshError::KeyMaterial(_) => None,
            MeshError::AddressConflict { .. } => Some(Phase::ConflictCheck),
            MeshError::Registry { phase, .. } => Some(*phase),
            MeshError::TunnelApply(_) => Some(Phase::Apply),
        }
    }
}
