use crate::*;

use std::time::Duration;

use wgmesh_core::config::AllowedIpsPolicy;
use wgmesh_services::{CycleOutcome, MemoryRegistry, MeshError};

/// Two nodes joining one by one, stepped manually.
#[tokio::test]
async fn test_two_nodes_converge_step_by_step() {
    let registry = Arc::new(MemoryRegistry::new());

    let mut a = test_node(registry.clone(), "10.0.0.1", "1.2.3.4:51820");
    a.node.register().await.unwrap();

    // A alone: link built with no remote peers.
    let outcome = a.reconciler.poll_once().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Applied { remote_peers: 0 });
    assert_eq!(
        a.link.calls(),
        vec![
            Call::Delete,
            Call::Create,
            Call::Configure(TunnelConfigSummary {
                listen_port: 51820,
                peers: vec![],
            }),
            Call::Address("10.0.0.1/24".parse().unwrap()),
            Call::Up,
        ]
    );

    let mut b = test_node(registry.clone(), "10.0.0.2", "5.6.7.8:51821");
    b.node.register().await.unwrap();

    // A sees B.
    let outcome = a.reconciler.poll_once().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Applied { remote_peers: 1 });
    let config = a.link.last_config().unwrap();
    assert_eq!(config.listen_port, 51820);
    assert_eq!(
        config.peers,
        vec![(
            b.node.public_key().to_string(),
            "5.6.7.8:51821".to_string(),
            vec!["10.0.0.2/32".to_string()],
        )]
    );

    // B's first poll already sees both.
    let outcome = b.reconciler.poll_once().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Applied { remote_peers: 1 });
    let config = b.link.last_config().unwrap();
    assert_eq!(config.listen_port, 51821);
    assert_eq!(config.peers[0].0, a.node.public_key().to_string());
    assert_eq!(config.peers[0].1, "1.2.3.4:51820");

    // Both settled.
    assert_eq!(a.reconciler.poll_once().await.unwrap(), CycleOutcome::Unchanged);
    assert_eq!(b.reconciler.poll_once().await.unwrap(), CycleOutcome::Unchanged);
    assert_eq!(a.link.rebuilds(), 2);
    assert_eq!(b.link.rebuilds(), 1);
    assert_eq!(a.reconciler.previous_fingerprint(), b.reconciler.previous_fingerprint());
}

/// A departing node is dropped from the survivors' links.
#[tokio::test]
async fn test_leave_triggers_rebuild_without_peer() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut a = test_node(registry.clone(), "10.0.0.1", "1.2.3.4:51820");
    let b = test_node(registry.clone(), "10.0.0.2", "5.6.7.8:51820");
    a.node.register().await.unwrap();
    b.node.register().await.unwrap();

    a.reconciler.poll_once().await.unwrap();
    assert_eq!(a.link.last_config().unwrap().peers.len(), 1);

    b.node.deregister().await.unwrap();
    let outcome = a.reconciler.poll_once().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Applied { remote_peers: 0 });
    assert!(a.link.last_config().unwrap().peers.is_empty());
}

/// Full-tunnel routing: every peer may route anything.
#[tokio::test]
async fn test_all_routes_policy() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut a = test_node(registry.clone(), "10.0.0.1", "1.2.3.4:51820");
    a.reconciler = a.reconciler.with_allowed_ips(AllowedIpsPolicy::AllRoutes);
    let b = test_node(registry.clone(), "10.0.0.2", "5.6.7.8:51820");
    a.node.register().await.unwrap();
    b.node.register().await.unwrap();

    a.reconciler.poll_once().await.unwrap();
    let config = a.link.last_config().unwrap();
    assert_eq!(config.peers[0].2, vec!["0.0.0.0/0".to_string()]);
}

/// A third node claiming an address already held is refused before joining.
#[tokio::test]
async fn test_address_conflict_blocks_join() {
    let registry = Arc::new(MemoryRegistry::new());
    let a = test_node(registry.clone(), "10.0.0.1", "1.2.3.4:51820");
    a.node.register().await.unwrap();

    let c = test_node(registry.clone(), "10.0.0.1", "9.9.9.9:51820");
    let err = c.node.register().await.unwrap_err();
    assert!(err.to_string().starts_with("conflict check:"), "{err}");
    match err {
        MeshError::AddressConflict { address, holder } => {
            assert_eq!(address, ip("10.0.0.1"));
            assert_eq!(holder, a.node.public_key());
        }
        other => panic!("expected address conflict, got {other}"),
    }
    assert_eq!(registry.count(MESH), 1);
}

/// A restarted node with the same key rejoins without duplicating its record.
#[tokio::test]
async fn test_restart_with_same_key_rejoins() {
    let registry = Arc::new(MemoryRegistry::new());
    let key = PrivateKey::generate();

    let first = test_node_with_key(registry.clone(), "10.0.0.1", "1.2.3.4:51820", key.clone());
    first.node.register().await.unwrap();
    drop(first);

    let mut second = test_node_with_key(registry.clone(), "10.0.0.1", "1.2.3.4:51999", key);
    second.node.register().await.unwrap();
    assert_eq!(registry.count(MESH), 1);

    second.reconciler.poll_once().await.unwrap();
    assert_eq!(second.link.last_config().unwrap().listen_port, 51999);
}

/// Two free-running loops converge on each other and stop on shutdown.
#[tokio::test]
async fn test_running_loops_converge() {
    let registry = Arc::new(MemoryRegistry::new());
    let a = test_node(registry.clone(), "10.0.0.1", "1.2.3.4:51820");
    let b = test_node(registry.clone(), "10.0.0.2", "5.6.7.8:51820");
    a.node.register().await.unwrap();

    let TestNode {
        node: node_a,
        link: link_a,
        reconciler: rec_a,
        shutdown: stop_a,
    } = a;
    let TestNode {
        node: node_b,
        link: link_b,
        reconciler: rec_b,
        shutdown: stop_b,
    } = b;

    let task_a = tokio::spawn(rec_a.run());
    tokio::time::sleep(Duration::from_millis(60)).await;

    node_b.register().await.unwrap();
    let task_b = tokio::spawn(rec_b.run());

    let converged = async {
        loop {
            let a_sees_b = link_a
                .last_config()
                .map(|c| c.peers.iter().any(|p| p.0 == node_b.public_key().to_string()))
                .unwrap_or(false);
            let b_sees_a = link_b
                .last_config()
                .map(|c| c.peers.iter().any(|p| p.0 == node_a.public_key().to_string()))
                .unwrap_or(false);
            if a_sees_b && b_sees_a {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), converged)
        .await
        .expect("nodes did not converge");

    // Let a few more polls run; nothing should be rebuilt.
    let settled_a = link_a.rebuilds();
    let settled_b = link_b.rebuilds();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(link_a.rebuilds(), settled_a);
    assert_eq!(link_b.rebuilds(), settled_b);

    stop_a.send(()).unwrap();
    stop_b.send(()).unwrap();
    for task in [task_a, task_b] {
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reconciler did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
