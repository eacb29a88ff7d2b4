//! Integration tests for the DiagNode public API.
//!
//! These tests run real nodes over loopback TCP and exercise diagnostic
//! rounds through the facade.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use meshdiag::{DiagNode, FanOut, GatherConfig, Identity, DEFAULT_CODE_VERSION};
use tokio::time::timeout;

/// Atomic port counter for unique port allocation across parallel tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(31000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn test_addr() -> String {
    format!("127.0.0.1:{}", next_port())
}

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const ROUND_TIMEOUT: Duration = Duration::from_secs(3);

async fn bind_node() -> DiagNode {
    DiagNode::bind(&test_addr()).await.expect("bind failed")
}

fn ids(infos: &[meshdiag::PeerInfo]) -> Vec<String> {
    infos.iter().map(|i| i.id.clone()).collect()
}

/// Connect `a` and `b` in both directions.
fn link(a: &DiagNode, b: &DiagNode) {
    assert!(a.add_peer(b.identity(), b.local_addr()));
    assert!(b.add_peer(a.identity(), a.local_addr()));
}

#[tokio::test]
async fn node_bind_and_identity() {
    let node = bind_node().await;

    let hex = node.identity().to_hex();
    assert_eq!(hex.len(), 64, "identity should be 64 hex chars");
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()), "identity should be hex");
    assert!(node.local_addr().port() > 0, "port should be positive");
}

#[tokio::test]
async fn bind_with_explicit_identity() {
    let identity = Identity::from_bytes([0xAB; 32]);
    let node = DiagNode::bind_with(&test_addr(), identity, GatherConfig::default())
        .await
        .expect("bind failed");
    assert_eq!(node.identity(), identity);
}

#[tokio::test]
async fn lone_node_reports_only_itself() {
    let node = bind_node().await;

    let result = timeout(TEST_TIMEOUT, node.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, node.identity().to_hex());
    assert!(result[0].connections.is_empty());
    assert_eq!(result[0].code_version, DEFAULT_CODE_VERSION);
}

#[tokio::test]
async fn unbounded_timeout_returns_normally() {
    let a = bind_node().await;
    let b = bind_node().await;
    link(&a, &b);

    let result = timeout(TEST_TIMEOUT, a.diagnostic(Duration::MAX))
        .await
        .expect("round timed out")
        .expect("round failed");
    assert_eq!(ids(&result), vec![a.identity().to_hex(), b.identity().to_hex()]);
}

#[tokio::test]
async fn triangle_gathers_every_node_once() {
    let a = bind_node().await;
    let b = bind_node().await;
    let c = bind_node().await;
    link(&a, &b);
    link(&b, &c);
    link(&c, &a);

    let result = timeout(TEST_TIMEOUT, a.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");

    let mut got = ids(&result);
    assert_eq!(got[0], a.identity().to_hex(), "originator comes first");
    got.sort();
    let mut want = vec![a.identity().to_hex(), b.identity().to_hex(), c.identity().to_hex()];
    want.sort();
    assert_eq!(got, want, "each node appears exactly once");

    for info in &result {
        assert_eq!(info.connections.len(), 2, "every triangle node has two links");
    }
}

#[tokio::test]
async fn chain_reaches_nodes_beyond_direct_peers() {
    let a = bind_node().await;
    let b = bind_node().await;
    let c = bind_node().await;
    link(&a, &b);
    link(&b, &c);

    let result = timeout(TEST_TIMEOUT, a.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");

    assert_eq!(
        ids(&result),
        vec![a.identity().to_hex(), b.identity().to_hex(), c.identity().to_hex()]
    );
}

#[tokio::test]
async fn unreachable_peer_is_skipped() {
    let a = bind_node().await;
    let b = bind_node().await;
    link(&a, &b);

    // nothing listens here
    let ghost = Identity::random();
    let ghost_addr: SocketAddr = test_addr().parse().unwrap();
    assert!(a.add_peer(ghost, ghost_addr));

    let result = timeout(TEST_TIMEOUT, a.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");

    assert_eq!(ids(&result), vec![a.identity().to_hex(), b.identity().to_hex()]);
    // the local snapshot still lists the dead link
    assert_eq!(result[0].connections.len(), 2);
}

#[tokio::test]
async fn shut_down_peer_is_skipped() {
    let a = bind_node().await;
    let b = bind_node().await;
    link(&a, &b);

    b.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = timeout(TEST_TIMEOUT, a.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");
    assert_eq!(ids(&result), vec![a.identity().to_hex()]);
}

#[tokio::test]
async fn removed_peer_is_not_asked() {
    let a = bind_node().await;
    let b = bind_node().await;
    link(&a, &b);

    assert!(a.remove_peer(&b.identity()));
    assert!(a.peers().is_empty());

    let result = a.diagnostic(ROUND_TIMEOUT).await.expect("round failed");
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn concurrent_fanout_over_tcp() {
    let config = GatherConfig {
        fanout: FanOut::Concurrent,
        ..GatherConfig::default()
    };
    let hub = DiagNode::bind_with(&test_addr(), Identity::random(), config)
        .await
        .expect("bind failed");

    let mut spokes = Vec::new();
    for _ in 0..4 {
        let spoke = bind_node().await;
        link(&hub, &spoke);
        spokes.push(spoke);
    }

    let result = timeout(TEST_TIMEOUT, hub.diagnostic(ROUND_TIMEOUT))
        .await
        .expect("round timed out")
        .expect("round failed");

    assert_eq!(result.len(), 5);
    assert_eq!(result[0].id, hub.identity().to_hex());
}

#[tokio::test]
async fn latency_recorded_after_round() {
    let a = bind_node().await;
    let b = bind_node().await;
    link(&a, &b);

    a.diagnostic(ROUND_TIMEOUT).await.expect("round failed");

    // the second round reports the connect time measured in the first
    let result = a.diagnostic(ROUND_TIMEOUT).await.expect("round failed");
    assert_eq!(result[0].connections.len(), 1);
    assert_eq!(result[0].connections[0].id, b.identity().to_hex());
    assert!(a.peers()[0].latency() > Duration::ZERO);
}

#[tokio::test]
async fn result_renders_as_json() {
    let node = bind_node().await;
    let result = node.diagnostic(ROUND_TIMEOUT).await.expect("round failed");

    let json = serde_json::to_value(&result).expect("serialize");
    let first = &json[0];
    assert_eq!(first["id"], node.identity().to_hex());
    assert!(first["lifespan"].is_u64());
    assert!(first["code_version"].is_string());
}
