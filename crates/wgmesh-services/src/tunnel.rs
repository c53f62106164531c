//! Tunnel device contract and the per-interface link resource.
//!
//! `TunnelApplier` is the thin kernel-facing seam: look up, delete, create,
//! configure, address and raise a tunnel link by name. `TunnelLink` owns one
//! interface name plus an applier and is the only thing that mutates that
//! link. Its mutating methods take `&mut self`, so a single owner can never
//! run two rebuilds of the same interface at once.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use thiserror::Error;
use zeroize::Zeroizing;

use wgmesh_core::config::AllowedIpsPolicy;
use wgmesh_core::{Endpoint, Peer, PrivateKey, PublicKey};

/// Observed state of a kernel link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    /// Administratively up.
    pub up: bool,
}

#[async_trait]
pub trait TunnelApplier: Send + Sync {
    /// `None` if no link with this name exists.
    async fn link_state(&self, name: &str) -> Result<Option<LinkState>, TunnelError>;

    /// Remove the link. A missing link is success.
    async fn delete_link(&self, name: &str) -> Result<(), TunnelError>;

    /// Create a tunnel-type link.
    async fn create_link(&self, name: &str) -> Result<(), TunnelError>;

    /// Replace the device's key, listen port and peer list.
    async fn configure(&self, name: &str, config: &TunnelConfig) -> Result<(), TunnelError>;

    /// Assign `address` (with its prefix) to the link.
    async fn assign_address(&self, name: &str, address: IpNet) -> Result<(), TunnelError>;

    async fn set_up(&self, name: &str) -> Result<(), TunnelError>;

    async fn set_down(&self, name: &str) -> Result<(), TunnelError>;
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("link lookup failed: {0}")]
    Lookup(String),
    #[error("invalid tunnel configuration: {0}")]
    InvalidConfig(String),
}

// ── Configuration ────────────────────────────────────────────────────────────

/// One remote peer entry on the tunnel device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPeer {
    pub public_key: PublicKey,
    pub endpoint: Endpoint,
    pub allowed_ips: Vec<IpNet>,
}

/// Full device configuration pushed in one go.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub listen_port: u16,
    pub private_key: PrivateKey,
    pub peers: Vec<TunnelPeer>,
}

impl TunnelConfig {
    /// Build the device config for `local`, with one entry per other peer in
    /// `members`. Entries keep the order of `members`.
    pub fn for_members(
        local: &Peer,
        private_key: &PrivateKey,
        members: &[Peer],
        policy: AllowedIpsPolicy,
    ) -> Result<Self, TunnelError> {
        let peers = members
            .iter()
            .filter(|p| p.public_key != local.public_key)
            .map(|p| {
                Ok(TunnelPeer {
                    public_key: p.public_key,
                    endpoint: p.endpoint.clone(),
                    allowed_ips: allowed_ips(p, policy)?,
                })
            })
            .collect::<Result<Vec<_>, TunnelError>>()?;

        Ok(Self {
            listen_port: local.endpoint.port,
            private_key: private_key.clone(),
            peers,
        })
    }

    /// Render in the `wg setconf` file format. Contains the private key.
    pub fn render(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::new());
        // Writing to a String cannot fail.
        let _ = writeln!(out, "[Interface]");
        let _ = writeln!(out, "PrivateKey = {}", self.private_key.to_base64().as_str());
        let _ = writeln!(out, "ListenPort = {}", self.listen_port);
        for peer in &self.peers {
            let allowed: Vec<String> = peer.allowed_ips.iter().map(|n| n.to_string()).collect();
            let _ = writeln!(out);
            let _ = writeln!(out, "[Peer]");
            let _ = writeln!(out, "PublicKey = {}", peer.public_key);
            let _ = writeln!(out, "Endpoint = {}", peer.endpoint);
            let _ = writeln!(out, "AllowedIPs = {}", allowed.join(", "));
        }
        out
    }
}

/// Destinations `peer` may route for under `policy`.
pub fn allowed_ips(peer: &Peer, policy: AllowedIpsPolicy) -> Result<Vec<IpNet>, TunnelError> {
    let net = match policy {
        AllowedIpsPolicy::PeerAddress => {
            let host_prefix = match peer.address {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            IpNet::new(peer.address, host_prefix)
        }
        AllowedIpsPolicy::AllRoutes => IpNet::new(IpAddr::from([0, 0, 0, 0]), 0),
    };
    net.map(|n| vec![n])
        .map_err(|e| TunnelError::InvalidConfig(e.to_string()))
}

// ── Owned link ───────────────────────────────────────────────────────────────

/// Exclusive owner of one tunnel link.
pub struct TunnelLink<A: ?Sized> {
    name: String,
    applier: Arc<A>,
}

impl<A: TunnelApplier + ?Sized> TunnelLink<A> {
    pub fn new(name: impl Into<String>, applier: Arc<A>) -> Self {
        Self {
            name: name.into(),
            applier,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applier(&self) -> &Arc<A> {
        &self.applier
    }

    /// Tear down and rebuild the link from scratch.
    ///
    /// Steps run strictly in order; the first failure aborts the rest and
    /// leaves the link in whatever state that step left it.
    pub async fn replace(&mut self, config: &TunnelConfig, address: IpNet) -> Result<(), TunnelError> {
        tracing::debug!(link = %self.name, "deleting old link");
        self.applier.delete_link(&self.name).await?;

        self.applier.create_link(&self.name).await?;
        self.applier.configure(&self.name, config).await?;
        self.applier.assign_address(&self.name, address).await?;
        self.applier.set_up(&self.name).await?;

        tracing::info!(
            link = %self.name,
            address = %address,
            listen_port = config.listen_port,
            peers = config.peers.len(),
            "tunnel link rebuilt"
        );
        Ok(())
    }

    pub async fn destroy(&mut self) -> Result<(), TunnelError> {
        self.applier.delete_link(&self.name).await?;
        tracing::info!(link = %self.name, "tunnel link removed");
        Ok(())
    }
}

/// True iff the link exists, is up, and `peers` already contains `local`'s key.
///
/// Lookup errors count as "not connected".
pub async fn check_link_already_connected<A: TunnelApplier + ?Sized>(
    applier: &A,
    name: &str,
    peers: &[Peer],
    local: &Peer,
) -> bool {
    let state = match applier.link_state(name).await {
        Ok(Some(state)) => state,
        Ok(None) => return false,
        Err(e) => {
            tracing::debug!(error = %e, link = name, "link lookup failed");
            return false;
        }
    };
    state.up && peers.iter().any(|p| p.public_key == local.public_key)
}
