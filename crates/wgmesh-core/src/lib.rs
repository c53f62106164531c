//! wgmesh-core — shared types, peer fingerprinting, configuration and key material.
//! All other wgmesh crates depend on this one.

pub mod config;
pub mod fingerprint;
pub mod keys;
pub mod peer;

pub use fingerprint::{fingerprint, Fingerprint};
pub use keys::{PrivateKey, PublicKey};
pub use peer::{Endpoint, Peer};
