//! HTTP status endpoint — exposes mesh state as JSON.

use std::sync::Arc;
use std::time::SystemTime;

use axum::routing::get;
use axum::{extract::State, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use wgmesh_services::{
    check_link_already_connected, LocalNode, MeshSnapshot, SharedSnapshot, TunnelApplier,
};

#[derive(Clone)]
pub struct StatusState {
    pub node: Arc<LocalNode>,
    pub snapshot: SharedSnapshot,
    pub applier: Arc<dyn TunnelApplier>,
}

fn read_snapshot(snapshot: &SharedSnapshot) -> MeshSnapshot {
    match snapshot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub interface:         String,
    pub public_key:        String,
    pub address:           String,
    pub endpoint:          String,
    pub fingerprint:       String,
    pub members:           usize,
    pub polls:             u64,
    pub applies:           u64,
    pub last_applied_secs: Option<u64>,
    pub connected:         bool,
}

async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let snap = read_snapshot(&state.snapshot);
    let local = state.node.peer();

    let connected =
        check_link_already_connected(&*state.applier, state.node.interface(), &snap.peers, local)
            .await;

    let last_applied_secs = snap.last_applied.map(|t| {
        SystemTime::now()
            .duration_since(t)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    });

    Json(StatusResponse {
        interface:   state.node.interface().to_string(),
        public_key:  local.public_key.to_string(),
        address:     state.node.network().to_string(),
        endpoint:    local.endpoint.to_string(),
        fingerprint: snap.fingerprint.to_string(),
        members:     snap.peers.len(),
        polls:       snap.polls,
        applies:     snap.applies,
        last_applied_secs,
        connected,
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub public_key: String,
    pub key_prefix: String,
    pub endpoint:   String,
    pub address:    String,
    pub local:      bool,
}

async fn handle_peers(State(state): State<StatusState>) -> Json<PeersResponse> {
    let snap = read_snapshot(&state.snapshot);
    let local_key = state.node.public_key();

    let peers = snap
        .peers
        .iter()
        .map(|p| PeerInfo {
            public_key: p.public_key.to_string(),
            key_prefix: p.public_key.short(),
            endpoint:   p.endpoint.to_string(),
            address:    p.address.to_string(),
            local:      p.public_key == local_key,
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/peers", get(handle_peers))
        .with_state(state)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
