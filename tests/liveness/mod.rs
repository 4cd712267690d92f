use std::time::Duration;

use meshsync::EventType;
use meshsync::KeepaliveRequest;
use meshsync::NodeStatus;
use tokio::time::timeout;

use crate::common::network;
use crate::common::node;
use crate::common::stays_quiet;
use crate::common::wait_for_message;
use crate::common::TestContext;
use crate::common::SETTLE;

#[tokio::test]
async fn test_vanished_node_is_marked_inactive_and_removed() {
    let ctx = TestContext::start(vec![
        network("net1", &["a", "b"]).into(),
        node("a", "10.0.0.2", &["net1"]).into(),
        node("b", "10.0.0.3", &["net1"]).into(),
    ])
    .await;
    let (mut a, _) = ctx.connect("a").await;
    let (b, _) = ctx.connect("b").await;

    b.cancel.cancel();

    ctx.wait_for_status("b", NodeStatus::Inactive).await;
    let removal = wait_for_message(&mut a, |m| m.event_type == EventType::NodeRemove).await;
    assert_eq!(removal.network.nodes[0].app_id, "b");

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_quick_reconnect_is_invisible_to_peers() {
    let ctx = TestContext::start(vec![
        network("net1", &["a", "b"]).into(),
        node("a", "10.0.0.2", &["net1"]).into(),
        node("b", "10.0.0.3", &["net1"]).into(),
    ])
    .await;
    let (mut a, _) = ctx.connect("a").await;
    let (b, _) = ctx.connect("b").await;

    b.cancel.cancel();
    let (_b, init) = ctx.connect("b").await;
    assert_eq!(init.event_type, EventType::Init);

    // Well past the 200ms grace window
    assert!(stays_quiet(&mut a, Duration::from_millis(500)).await);
    assert_eq!(ctx.node("b").await.status.status, NodeStatus::Active);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_tracks_liveness() {
    let mut silent = node("b", "10.0.0.3", &["net1"]);
    silent.status.status = NodeStatus::Inactive;
    let ctx = TestContext::start(vec![network("net1", &["b"]).into(), silent.into()]).await;

    let mut ka = ctx.keepalive("b").await;
    for _ in 0..3 {
        let probe = timeout(SETTLE, ka.responses.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(probe.pub_key, "pk-b");
        ka.requests
            .send(Ok(KeepaliveRequest {
                app_id: "b".into(),
                pub_key: probe.pub_key,
            }))
            .await
            .unwrap();
    }
    ctx.wait_for_status("b", NodeStatus::Active).await;

    // Stop answering; the next probe goes unanswered
    ctx.wait_for_status("b", NodeStatus::Inactive).await;
    drop(ka);

    ctx.shutdown().await;
}
