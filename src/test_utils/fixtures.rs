use std::sync::Arc;

use crate::ChangeDetector;
use crate::MemoryStore;
use crate::Network;
use crate::Node;
use crate::NodePhase;
use crate::NodeStatus;
use crate::Policy;
use crate::PolicyAction;
use crate::Resource;
use crate::Rule;
use crate::StoreClient;
use crate::StoreConfig;
use crate::StreamConfig;

pub const NS: &str = "default";

/// Provisioned, live node with keys derived from its AppId
pub fn ready_node(
    app_id: &str,
    address: &str,
    networks: &[&str],
) -> Node {
    let mut node = Node::new(NS, app_id, address, format!("pk-{app_id}"));
    node.spec.private_key = format!("sk-{app_id}");
    node.spec.networks = networks.iter().map(|n| n.to_string()).collect();
    node.status.phase = NodePhase::Ready;
    node.status.status = NodeStatus::Active;
    node
}

pub fn network(
    name: &str,
    members: &[&str],
) -> Network {
    let mut n = Network::new(NS, name, "10.0.0.0/24");
    for m in members {
        n.add_member(m);
    }
    n
}

pub fn policy(
    name: &str,
    network: &str,
) -> Policy {
    let mut p = Policy::new(NS, name, network);
    p.spec.action = PolicyAction::Allow;
    p.spec.ingress = vec![Rule {
        ports: vec![22],
        ..Rule::default()
    }];
    p
}

/// Fast conflict retries for tests
pub fn test_store_config() -> StoreConfig {
    StoreConfig {
        namespace: NS.to_string(),
        conflict_retries: 3,
        conflict_backoff_ms: 1,
    }
}

pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        channel_capacity: 8,
        delivery_timeout_ms: 100,
        disconnect_grace_ms: 1_000,
        first_request_timeout_ms: 1_000,
        keepalive_interval_ms: 3_000,
        keepalive_timeout_ms: 1_000,
    }
}

/// Memory store holding `resources`
pub async fn seeded_store(resources: Vec<Resource>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for r in resources {
        store.create(r).await.expect("seed resource");
    }
    store
}

pub fn detector() -> Arc<ChangeDetector> {
    Arc::new(ChangeDetector::new())
}
