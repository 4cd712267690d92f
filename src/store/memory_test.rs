use std::time::Duration;
use std::time::SystemTime;

use futures::StreamExt;
use tokio::time::timeout;

use super::*;
use crate::Network;
use crate::Node;
use crate::NodeStatus;
use crate::Policy;
use crate::StoreError;

const NS: &str = "default";

#[tokio::test]
async fn test_create_assigns_version_and_timestamp() {
    let store = MemoryStore::new();
    let created = store.create(Node::new(NS, "n1", "10.0.0.2", "pk1").into()).await.unwrap();

    assert_eq!(created.meta().resource_version, "1");
    assert!(created.meta().creation_timestamp.is_some());
    assert_eq!(store.count(Kind::Node), 1);
}

#[tokio::test]
async fn test_create_keeps_explicit_creation_timestamp() {
    let store = MemoryStore::new();
    let past = SystemTime::now() - Duration::from_secs(600);
    let mut node = Node::new(NS, "n1", "10.0.0.2", "pk1");
    node.meta.creation_timestamp = Some(past);

    let created = store.create(node.into()).await.unwrap();
    assert_eq!(created.meta().creation_timestamp, Some(past));
}

#[tokio::test]
async fn test_create_duplicate_fails() {
    let store = MemoryStore::new();
    store.create(Network::new(NS, "net1", "10.0.0.0/24").into()).await.unwrap();
    let err = store.create(Network::new(NS, "net1", "10.0.0.0/24").into()).await.unwrap_err();

    assert!(matches!(err, crate::Error::Store(StoreError::AlreadyExists { .. })));
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let store = MemoryStore::new();
    let err = store.get(Kind::Node, NS, "ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_with_stale_version_conflicts() {
    let store = MemoryStore::new();
    let created = store.create(Network::new(NS, "net1", "10.0.0.0/24").into()).await.unwrap();

    let mut first = created.clone();
    if let Resource::Network(n) = &mut first {
        n.add_member("n1");
    }
    store.update(first).await.unwrap();

    // Second writer still holds the original version
    let mut second = created;
    if let Resource::Network(n) = &mut second {
        n.add_member("n2");
    }
    let err = store.update(second).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_update_does_not_touch_node_status() {
    let store = MemoryStore::new();
    let created = store.create(Node::new(NS, "n1", "10.0.0.2", "pk1").into()).await.unwrap();

    let mut node = created.into_node().unwrap();
    node.status.status = NodeStatus::Active;
    node.spec.address = "10.0.0.9".into();
    let updated = store.update(node.into()).await.unwrap().into_node().unwrap();

    assert_eq!(updated.spec.address, "10.0.0.9");
    assert_eq!(updated.status.status, NodeStatus::Inactive);
}

#[tokio::test]
async fn test_update_status_only_writes_status() {
    let store = MemoryStore::new();
    let created = store.create(Node::new(NS, "n1", "10.0.0.2", "pk1").into()).await.unwrap();

    let mut node = created.into_node().unwrap();
    node.status.status = NodeStatus::Active;
    node.spec.address = "10.0.0.9".into();
    let updated = store.update_status(node.into()).await.unwrap().into_node().unwrap();

    assert_eq!(updated.spec.address, "10.0.0.2");
    assert_eq!(updated.status.status, NodeStatus::Active);
}

#[tokio::test]
async fn test_update_status_rejects_kinds_without_status() {
    let store = MemoryStore::new();
    let created = store.create(Policy::new(NS, "p1", "net1").into()).await.unwrap();
    assert!(store.update_status(created).await.is_err());
}

#[tokio::test]
async fn test_list_filters_by_namespace_and_selector() {
    let store = MemoryStore::new();
    store.create(Policy::new(NS, "p1", "net1").into()).await.unwrap();
    store.create(Policy::new(NS, "p2", "net2").into()).await.unwrap();
    store.create(Policy::new("other", "p3", "net1").into()).await.unwrap();

    let selector = Selector::everything().field("spec.network", "net1");
    let policies = store.list(Kind::Policy, NS, &selector).await.unwrap();

    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].name(), "p1");
}

#[tokio::test]
async fn test_watch_delivers_events_in_write_order() {
    let store = MemoryStore::new();
    let mut events = store.watch(Kind::Node).await.unwrap();

    // Events of other kinds are filtered out
    store.create(Network::new(NS, "net1", "10.0.0.0/24").into()).await.unwrap();
    let created = store.create(Node::new(NS, "n1", "10.0.0.2", "pk1").into()).await.unwrap();
    let mut node = created.into_node().unwrap();
    node.spec.address = "10.0.0.3".into();
    store.update(node.into()).await.unwrap();
    store.delete(Kind::Node, NS, "n1").unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(1), events.next())
            .await
            .expect("event should arrive")
            .expect("stream open");
        seen.push(event.event);
    }
    assert_eq!(seen, vec![WatchEventType::Add, WatchEventType::Update, WatchEventType::Delete]);
}

#[tokio::test]
async fn test_lagging_watch_is_closed() {
    let store = MemoryStore::with_event_buffer(2);
    let mut events = store.watch(Kind::Node).await.unwrap();

    for i in 0..4 {
        let name = format!("n{i}");
        store.create(Node::new(NS, &name, "10.0.0.2", "pk").into()).await.unwrap();
    }

    let next = timeout(Duration::from_secs(1), events.next()).await.expect("stream should end");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let store = MemoryStore::new();
    assert!(store.delete(Kind::Node, NS, "ghost").unwrap_err().is_not_found());
}
