use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::timeout;

use super::*;
use crate::test_utils::network;
use crate::test_utils::ready_node;
use crate::test_utils::seeded_store;
use crate::test_utils::test_store_config;
use crate::test_utils::test_stream_config;
use crate::test_utils::NS;
use crate::update_with_retry;
use crate::AgentEnd;
use crate::AgentStream;
use crate::Error;
use crate::EventType;
use crate::Kind;
use crate::Message;
use crate::MockStoreClient;
use crate::Resource;
use crate::ResourceEventStream;
use crate::StoreError;
use crate::WatchRequest;

fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.store = test_store_config();
    config.stream = test_stream_config();
    config.queue.workers = 2;
    config
}

/// Opens a Watch stream for `app_id` the way a transport would
fn connect(
    controller: &Controller,
    app_id: &str,
) -> AgentEnd<WatchRequest, Message> {
    let (stream, end) = AgentStream::channel(8);
    end.requests
        .try_send(Ok(WatchRequest {
            app_id: app_id.to_string(),
        }))
        .unwrap();
    let handler = controller.watch_handler();
    tokio::spawn(async move { handler.handle(stream).await });
    end
}

async fn next_message(end: &mut AgentEnd<WatchRequest, Message>) -> Message {
    timeout(Duration::from_secs(2), end.responses.recv())
        .await
        .expect("message in time")
        .expect("stream open")
        .expect("message, not status")
}

#[tokio::test]
async fn test_address_change_reaches_node_and_peer() {
    let store = seeded_store(vec![
        network("net1", &["n1", "n2"]).into(),
        ready_node("n1", "10.0.0.2", &["net1"]).into(),
        ready_node("n2", "10.0.0.3", &["net1"]).into(),
    ])
    .await;
    let (tx, rx) = watch::channel(());
    let controller = Arc::new(ControllerBuilder::new(test_config(), store.clone(), rx).build());
    let running = {
        let c = controller.clone();
        tokio::spawn(async move { c.run().await })
    };
    // Let the watcher subscribe
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut n1 = connect(&controller, "n1");
    let mut n2 = connect(&controller, "n2");
    assert_eq!(next_message(&mut n1).await.event_type, EventType::Init);
    assert_eq!(next_message(&mut n2).await.event_type, EventType::Init);

    update_with_retry(store.as_ref(), Kind::Node, NS, "n1", &test_store_config(), |r| match r {
        Resource::Node(n) => {
            n.spec.address = "10.0.0.5".into();
            true
        }
        _ => false,
    })
    .await
    .unwrap();

    let to_n1 = next_message(&mut n1).await;
    assert_eq!(to_n1.event_type, EventType::IpChange);
    assert_eq!(to_n1.current.address, "10.0.0.5");

    let to_n2 = next_message(&mut n2).await;
    assert_eq!(to_n2.event_type, EventType::PeerUpdate);
    assert_eq!(to_n2.network.nodes[0].address, "10.0.0.5");

    tx.send(()).unwrap();
    timeout(Duration::from_secs(2), running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_deleted_node_is_removed_from_peers() {
    let store = seeded_store(vec![
        network("net1", &["a", "b"]).into(),
        ready_node("a", "10.0.0.2", &["net1"]).into(),
        ready_node("b", "10.0.0.3", &["net1"]).into(),
    ])
    .await;
    let (tx, rx) = watch::channel(());
    let controller = Arc::new(ControllerBuilder::new(test_config(), store.clone(), rx).build());
    let running = {
        let c = controller.clone();
        tokio::spawn(async move { c.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut b = connect(&controller, "b");
    assert_eq!(next_message(&mut b).await.event_type, EventType::Init);

    store.delete(Kind::Node, NS, "a").unwrap();

    let removal = next_message(&mut b).await;
    assert_eq!(removal.event_type, EventType::NodeRemove);
    assert_eq!(removal.network.nodes[0].app_id, "a");
    assert_eq!(removal.current.private_key, None);

    tx.send(()).unwrap();
    timeout(Duration::from_secs(2), running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_run_returns_after_shutdown() {
    let store = seeded_store(vec![]).await;
    let (tx, rx) = watch::channel(());
    let controller = ControllerBuilder::new(test_config(), store, rx).build();

    assert!(controller.registry().is_empty());
    assert!(controller.queue().is_empty());
    assert!(!controller.delivery().is_connected("n1"));

    tx.send(()).unwrap();
    timeout(Duration::from_secs(2), controller.run()).await.unwrap().unwrap();
    assert!(controller.queue().is_shutting_down());
}

#[tokio::test]
async fn test_run_stops_when_a_store_watch_closes() {
    let mut store = MockStoreClient::new();
    store.expect_watch().returning(|kind| {
        let s: ResourceEventStream = match kind {
            Kind::Policy => futures::stream::empty().boxed(),
            _ => futures::stream::pending().boxed(),
        };
        Ok(s)
    });
    let (_tx, rx) = watch::channel(());
    let controller = ControllerBuilder::new(test_config(), Arc::new(store), rx).build();

    let err = timeout(Duration::from_secs(2), controller.run()).await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::WatchClosed(Kind::Policy))));
    assert!(controller.queue().is_shutting_down());
}
