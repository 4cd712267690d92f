use meshsync::update_with_retry;
use meshsync::EventType;
use meshsync::Kind;
use meshsync::Message;
use meshsync::Policy;
use meshsync::PolicyAction;
use meshsync::Resource;
use meshsync::Rule;
use meshsync::StoreClient;
use meshsync::StoreConfig;

use crate::common::network;
use crate::common::node;
use crate::common::wait_for_message;
use crate::common::TestContext;
use crate::common::NS;

fn peer_addresses(msg: &Message) -> Vec<(&str, &str)> {
    msg.network.nodes.iter().map(|p| (p.app_id.as_str(), p.address.as_str())).collect()
}

#[tokio::test]
async fn test_node_lifecycle_is_mirrored_to_peers() {
    let ctx = TestContext::start(vec![
        network("net1", &["a"]).into(),
        node("a", "10.0.0.2", &["net1"]).into(),
    ])
    .await;

    let (mut a, init) = ctx.connect("a").await;
    assert_eq!(init.event_type, EventType::Init);
    assert_eq!(init.current.private_key.as_deref(), Some("sk-a"));
    assert!(init.network.nodes.is_empty());

    // b is provisioned: a learns about it before b ever connects
    ctx.store.create(node("b", "10.0.0.3", &["net1"]).into()).await.unwrap();
    let msg = wait_for_message(&mut a, |m| !m.network.nodes.is_empty()).await;
    assert_eq!(peer_addresses(&msg), vec![("b", "10.0.0.3")]);
    assert_eq!(msg.network.nodes[0].allowed_ips, vec!["10.0.0.3/32"]);

    let (mut b, init) = ctx.connect("b").await;
    assert_eq!(peer_addresses(&init), vec![("a", "10.0.0.2")]);

    // b moves: b hears IPChange, a hears the new address
    let config = StoreConfig::default();
    update_with_retry(ctx.store.as_ref(), Kind::Node, NS, "b", &config, |r| match r {
        Resource::Node(n) => {
            n.spec.address = "10.0.0.9".into();
            true
        }
        _ => false,
    })
    .await
    .unwrap();

    let to_b = wait_for_message(&mut b, |m| m.event_type == EventType::IpChange).await;
    assert_eq!(to_b.current.address, "10.0.0.9");
    let to_a = wait_for_message(&mut a, |m| peer_addresses(m) == vec![("b", "10.0.0.9")]).await;
    assert_eq!(to_a.event_type, EventType::PeerUpdate);

    // b is deleted: a gets a removal naming b only
    ctx.store.delete(Kind::Node, NS, "b").unwrap();
    let removal = wait_for_message(&mut a, |m| m.event_type == EventType::NodeRemove).await;
    assert_eq!(peer_addresses(&removal), vec![("b", "10.0.0.9")]);
    assert_eq!(removal.current.private_key, None);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_policy_reaches_every_member() {
    let ctx = TestContext::start(vec![
        network("net1", &["a", "b"]).into(),
        node("a", "10.0.0.2", &["net1"]).into(),
        node("b", "10.0.0.3", &["net1"]).into(),
    ])
    .await;
    let (mut a, _) = ctx.connect("a").await;
    let (mut b, _) = ctx.connect("b").await;

    let mut policy = Policy::new(NS, "allow-ssh", "net1");
    policy.spec.action = PolicyAction::Allow;
    policy.spec.ingress = vec![Rule {
        ports: vec![22],
        ..Rule::default()
    }];
    ctx.create_policy(policy).await;

    for end in [&mut a, &mut b] {
        let msg = wait_for_message(end, |m| !m.network.policies.is_empty()).await;
        assert_eq!(msg.network.policies[0].policy_name, "allow-ssh");
        assert_eq!(msg.network.policies[0].ingress[0].ports, vec![22]);
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_gets_fresh_snapshot() {
    let ctx = TestContext::start(vec![
        network("net1", &["a", "b"]).into(),
        node("a", "10.0.0.2", &["net1"]).into(),
        node("b", "10.0.0.3", &["net1"]).into(),
    ])
    .await;

    let (first, init) = ctx.connect("a").await;
    first.cancel.cancel();

    // Same content as before, still delivered
    let (_second, again) = ctx.connect("a").await;
    assert_eq!(again.event_type, EventType::Init);
    assert_eq!(again.network, init.network);
    assert_ne!(again.config_version, init.config_version);

    ctx.shutdown().await;
}
