//! wgmesh integration test harness.
//!
//! Most tests run several nodes in one process against a shared registry
//! and a recording tunnel applier, so they need no privileges.
//!
//! Tests in `kernel` drive real tunnel links and require root plus the
//! wireguard module:
//!
//!   sudo cargo test --test integration kernel
//!
//! They print SKIP and return when the host can't run them.

mod convergence;

use std::net::IpAddr;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::broadcast;

use wgmesh_core::PrivateKey;
use wgmesh_services::{
    LinkState, LocalNode, Reconciler, Registry, TunnelApplier, TunnelConfig, TunnelError,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const MESH: &str = "wgmesh-it";

/// One applier call as seen by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Delete,
    Create,
    Configure(TunnelConfigSummary),
    Address(IpNet),
    Up,
    Down,
}

/// The parts of a pushed config tests care about.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfigSummary {
    pub listen_port: u16,
    /// (base64 key, endpoint, allowed ips)
    pub peers: Vec<(String, String, Vec<String>)>,
}

impl From<&TunnelConfig> for TunnelConfigSummary {
    fn from(c: &TunnelConfig) -> Self {
        Self {
            listen_port: c.listen_port,
            peers: c
                .peers
                .iter()
                .map(|p| {
                    (
                        p.public_key.to_string(),
                        p.endpoint.to_string(),
                        p.allowed_ips.iter().map(|n| n.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// In-memory stand-in for the kernel. Tracks whether the link exists and is up.
#[derive(Default)]
pub struct RecordingLink {
    calls: Mutex<Vec<Call>>,
    state: Mutex<Option<LinkState>>,
}

impl RecordingLink {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of full rebuilds (each starts with a create).
    pub fn rebuilds(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Create).count()
    }

    pub fn last_config(&self) -> Option<TunnelConfigSummary> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::Configure(s) => Some(s),
            _ => None,
        })
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TunnelApplier for RecordingLink {
    async fn link_state(&self, _name: &str) -> Result<Option<LinkState>, TunnelError> {
        Ok(*self.state.lock().unwrap())
    }

    async fn delete_link(&self, _name: &str) -> Result<(), TunnelError> {
        self.push(Call::Delete);
        *self.state.lock().unwrap() = None;
        Ok(())
    }

    async fn create_link(&self, _name: &str) -> Result<(), TunnelError> {
        self.push(Call::Create);
        *self.state.lock().unwrap() = Some(LinkState { up: false });
        Ok(())
    }

    async fn configure(&self, _name: &str, config: &TunnelConfig) -> Result<(), TunnelError> {
        self.push(Call::Configure(config.into()));
        Ok(())
    }

    async fn assign_address(&self, _name: &str, address: IpNet) -> Result<(), TunnelError> {
        self.push(Call::Address(address));
        Ok(())
    }

    async fn set_up(&self, _name: &str) -> Result<(), TunnelError> {
        self.push(Call::Up);
        *self.state.lock().unwrap() = Some(LinkState { up: true });
        Ok(())
    }

    async fn set_down(&self, _name: &str) -> Result<(), TunnelError> {
        self.push(Call::Down);
        *self.state.lock().unwrap() = Some(LinkState { up: false });
        Ok(())
    }
}

/// A node plus its reconciler, wired to a recording link.
pub struct TestNode {
    pub node: Arc<LocalNode>,
    pub link: Arc<RecordingLink>,
    pub reconciler: Reconciler<RecordingLink>,
    pub shutdown: broadcast::Sender<()>,
}

pub fn test_node(registry: Arc<dyn Registry>, address: &str, endpoint: &str) -> TestNode {
    test_node_with_key(registry, address, endpoint, PrivateKey::generate())
}

pub fn test_node_with_key(
    registry: Arc<dyn Registry>,
    address: &str,
    endpoint: &str,
    key: PrivateKey,
) -> TestNode {
    let node = Arc::new(
        LocalNode::new(registry, MESH, endpoint, address, 24, key).expect("valid node config"),
    );
    let link = Arc::new(RecordingLink::default());
    let (shutdown, rx) = broadcast::channel(1);
    let reconciler = Reconciler::new(node.clone(), link.clone(), rx)
        .with_poll_interval(std::time::Duration::from_millis(20));
    TestNode {
        node,
        link,
        reconciler,
        shutdown,
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Root, `ip` and `wg` present, and the kernel can create a wireguard link.
pub fn kernel_available() -> bool {
    static PROBES: AtomicU64 = AtomicU64::new(0);
    let n = PROBES.fetch_add(1, Ordering::Relaxed);
    let probe = format!("wgp{}-{}", std::process::id() % 100_000, n);
    let created = Command::new("ip")
        .args(["link", "add", "dev", probe.as_str(), "type", "wireguard"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !created {
        return false;
    }
    let _ = Command::new("ip").args(["link", "del", "dev", probe.as_str()]).output();
    Command::new("wg")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run a command and return stdout.
pub fn run(program: &str, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "{program} {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
