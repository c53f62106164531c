//! Mesh reconciliation loop.
//!
//! Polls the registry, fingerprints the membership, and rebuilds the tunnel
//! link only when the fingerprint moves. One `Reconciler` per interface; it
//! owns that interface's `TunnelLink`, so polls and rebuilds are strictly
//! serialized.
//!
//! ```text
//!   Polling ──same fingerprint──▶ sleep(poll_interval) ──▶ Polling
//!      │
//!      └──new fingerprint──▶ Applying ──ok──▶ Polling (immediately)
//!                               │
//!                               └──err──▶ loop returns the error
//! ```
//!
//! The fingerprint is recorded as soon as a fetch succeeds, before any apply,
//! so a failed apply is not retried against the same membership.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use wgmesh_core::config::AllowedIpsPolicy;
use wgmesh_core::{fingerprint, Fingerprint, Peer};

use crate::error::{MeshError, Phase};
use crate::node::LocalNode;
use crate::tunnel::{TunnelApplier, TunnelConfig, TunnelLink};

/// Default sleep between polls when nothing changed.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Same membership as last time. Nothing touched.
    Unchanged,
    /// Link rebuilt with this many remote peers.
    Applied { remote_peers: usize },
}

/// Last observed membership, published for the status endpoint.
#[derive(Debug, Clone, Default)]
pub struct MeshSnapshot {
    pub fingerprint: Fingerprint,
    /// Sorted by public key, descending.
    pub peers: Vec<Peer>,
    pub polls: u64,
    pub applies: u64,
    pub last_applied: Option<SystemTime>,
}

pub type SharedSnapshot = Arc<RwLock<MeshSnapshot>>;

pub struct Reconciler<A: TunnelApplier + ?Sized> {
    node: Arc<LocalNode>,
    link: TunnelLink<A>,
    poll_interval: Duration,
    allowed_ips: AllowedIpsPolicy,
    previous: Fingerprint,
    snapshot: SharedSnapshot,
    shutdown: broadcast::Receiver<()>,
}

impl<A: TunnelApplier + ?Sized> Reconciler<A> {
    pub fn new(node: Arc<LocalNode>, applier: Arc<A>, shutdown: broadcast::Receiver<()>) -> Self {
        let link = TunnelLink::new(node.interface(), applier);
        Self {
            node,
            link,
            poll_interval: POLL_INTERVAL,
            allowed_ips: AllowedIpsPolicy::default(),
            previous: Fingerprint::empty(),
            snapshot: Arc::new(RwLock::new(MeshSnapshot::default())),
            shutdown,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_allowed_ips(mut self, policy: AllowedIpsPolicy) -> Self {
        self.allowed_ips = policy;
        self
    }

    /// Handle to the published membership snapshot.
    pub fn snapshot(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    pub fn previous_fingerprint(&self) -> Fingerprint {
        self.previous
    }

    /// Run until shutdown is signalled or a cycle fails.
    pub async fn run(mut self) -> Result<(), MeshError> {
        tracing::info!(
            interface = self.node.interface(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "reconciler starting"
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            let fetched = tokio::select! {
                _ = self.shutdown.recv() => break,
                r = self.node.fetch_peers() => r,
            };
            let peers = fetched.map_err(|e| MeshError::registry(Phase::Polling, e))?;

            // An apply that starts runs to completion, so check first.
            if self.shutdown_requested() {
                break;
            }

            match self.observe(peers).await? {
                CycleOutcome::Applied { .. } => continue,
                CycleOutcome::Unchanged => {
                    tracing::trace!("membership unchanged");
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(interface = self.node.interface(), "reconciler shutting down");
        Ok(())
    }

    /// One full cycle: fetch, fingerprint, and apply if membership changed.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, MeshError> {
        let peers = self
            .node
            .fetch_peers()
            .await
            .map_err(|e| MeshError::registry(Phase::Polling, e))?;
        self.observe(peers).await
    }

    async fn observe(&mut self, mut peers: Vec<Peer>) -> Result<CycleOutcome, MeshError> {
        let current = fingerprint(&mut peers);
        tracing::debug!(fingerprint = %current, peers = peers.len(), "polled registry");

        let changed = current != self.previous;
        self.previous = current;
        self.publish(current, &peers, false);

        if !changed {
            return Ok(CycleOutcome::Unchanged);
        }

        tracing::info!(
            fingerprint = %current,
            members = peers.len(),
            "membership changed, rebuilding link"
        );
        let remote_peers = self.apply(&peers).await?;
        self.publish(current, &peers, true);
        Ok(CycleOutcome::Applied { remote_peers })
    }

    async fn apply(&mut self, peers: &[Peer]) -> Result<usize, MeshError> {
        let config = TunnelConfig::for_members(
            self.node.peer(),
            self.node.private_key(),
            peers,
            self.allowed_ips,
        )?;
        self.link.replace(&config, self.node.network()).await?;
        Ok(config.peers.len())
    }

    fn publish(&self, fingerprint: Fingerprint, peers: &[Peer], applied: bool) {
        // A poisoned lock only means a status reader panicked.
        let mut snap = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        snap.fingerprint = fingerprint;
        snap.peers = peers.to_vec();
        if applied {
            snap.applies += 1;
            snap.last_applied = Some(SystemTime::now());
        } else {
            snap.polls += 1;
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        match self.shutdown.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
        }
    }
}
