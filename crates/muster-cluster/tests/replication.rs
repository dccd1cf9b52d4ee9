//! Two-node replication over the in-memory transport

use muster_cluster::{ClusterError, Gossiper, MemoryPeerTransport, PeerTransport};
use muster_core::{ClusterConfig, ManualClock, MusterConfig, NodeId};
use muster_registry::{
    ApplyOutcome, InstanceKey, InstanceStatus, RegisterRequest, Registry, ReplicationAction,
    ReplicationEvent, ReplicationSink,
};
use std::sync::Arc;

struct TestNode {
    registry: Arc<Registry>,
    gossiper: Arc<Gossiper>,
}

fn node(id: &str, peer: &str, clock: &Arc<ManualClock>) -> TestNode {
    let mut config = MusterConfig::for_testing();
    config.cluster = ClusterConfig::for_testing().with_peers(vec![peer.to_string()]);

    let gossiper = Arc::new(Gossiper::new(&config.cluster));
    let sink: Arc<dyn ReplicationSink> = gossiper.clone();
    let registry = Arc::new(Registry::with_providers(
        config,
        NodeId::new(id).unwrap(),
        clock.clone(),
        Some(sink),
    ));
    TestNode { registry, gossiper }
}

fn cluster() -> (TestNode, TestNode, Arc<MemoryPeerTransport>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let transport = Arc::new(MemoryPeerTransport::new());

    let a = node("node-a", "mem://b", &clock);
    let b = node("node-b", "mem://a", &clock);
    transport.add_peer("mem://a", a.registry.clone());
    transport.add_peer("mem://b", b.registry.clone());

    a.gossiper
        .start(a.registry.clone(), transport.clone())
        .unwrap();
    b.gossiper
        .start(b.registry.clone(), transport.clone())
        .unwrap();

    (a, b, transport, clock)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

async fn shutdown(nodes: [&TestNode; 2]) {
    for node in nodes {
        node.gossiper.stop().await.unwrap();
    }
}

fn order(id: &str) -> RegisterRequest {
    RegisterRequest::new("orders", id, "10.0.0.1", 8080)
}

#[tokio::test]
async fn test_register_replicates_to_peer() {
    let (a, b, _, _) = cluster();

    a.registry.register(order("o-1")).unwrap();
    eventually(|| b.registry.query("orders").unwrap().len() == 1).await;

    let record = b.registry.get_instance("orders", "o-1").unwrap();
    assert_eq!(record.origin_node.as_str(), "node-a");
    assert_eq!(record.instance.port, 8080);

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_replicated_events_are_not_forwarded() {
    let (a, b, _, _) = cluster();

    a.registry.register(order("o-1")).unwrap();
    eventually(|| b.registry.store().len() == 1).await;
    settle().await;

    assert_eq!(a.gossiper.stats()[0].delivered_count, 1);
    assert_eq!(b.gossiper.stats()[0].enqueued_count, 0);

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_cancel_replicates_to_peer() {
    let (a, b, _, _) = cluster();

    a.registry.register(order("o-1")).unwrap();
    a.registry.register(order("o-2")).unwrap();
    eventually(|| b.registry.query("orders").unwrap().len() == 2).await;

    a.registry.cancel("orders", "o-1").unwrap();
    eventually(|| b.registry.query("orders").unwrap().len() == 1).await;
    assert!(b.registry.get_instance("orders", "o-2").is_ok());

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_status_conflict_resolves_last_write_wins() {
    let (a, b, transport, clock) = cluster();

    a.registry.register(order("o-1")).unwrap();
    eventually(|| b.registry.store().len() == 1).await;
    let registered_at = a.registry.get_instance("orders", "o-1").unwrap().last_updated_ms;

    clock.advance_ms(5);
    b.registry
        .update_status("orders", "o-1", InstanceStatus::Down)
        .unwrap();
    eventually(|| {
        a.registry.query("orders").unwrap()[0].status == InstanceStatus::Down
    })
    .await;

    // a delayed write older than node-b's update loses
    let late = ReplicationEvent::new(
        NodeId::new("node-a").unwrap(),
        registered_at,
        ReplicationAction::StatusUpdate {
            key: InstanceKey::parse("orders", "o-1").unwrap(),
            status: InstanceStatus::Up,
        },
    );
    let outcome = transport.send("mem://b", &late).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Stale);
    assert_eq!(
        b.registry.query("orders").unwrap()[0].status,
        InstanceStatus::Down
    );

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_partitioned_peer_drops_after_retries() {
    let (a, b, transport, _) = cluster();
    transport.partition("mem://b");

    a.registry.register(order("o-1")).unwrap();
    eventually(|| a.gossiper.stats()[0].dropped_failed_count == 1).await;

    let stats = &a.gossiper.stats()[0];
    assert_eq!(stats.retried_count, 2);
    assert_eq!(stats.delivered_count, 0);
    assert!(b.registry.store().is_empty());

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_renew_after_missed_register_reregisters() {
    let (a, b, transport, _) = cluster();
    transport.partition("mem://b");
    a.registry.register(order("o-1")).unwrap();
    eventually(|| a.gossiper.stats()[0].dropped_failed_count == 1).await;

    transport.heal("mem://b");
    a.registry.renew("orders", "o-1", None).unwrap();
    eventually(|| b.registry.store().len() == 1).await;

    assert_eq!(a.gossiper.stats()[0].reregistered_count, 1);
    assert!(b.registry.renew("orders", "o-1", None).is_ok());

    shutdown([&a, &b]).await;
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let (a, b, transport, _) = cluster();

    let again = a.gossiper.start(a.registry.clone(), transport.clone());
    assert!(matches!(again, Err(ClusterError::AlreadyStarted)));

    shutdown([&a, &b]).await;
    assert!(matches!(a.gossiper.stop().await, Err(ClusterError::NotStarted)));
}
