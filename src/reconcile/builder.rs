use parking_lot::Mutex;

use super::NodeContext;
use crate::utils::time::now_unix_secs;
use crate::ChangeDetails;
use crate::CurrentNode;
use crate::EventType;
use crate::Message;
use crate::Network;
use crate::NetworkView;
use crate::Node;
use crate::PeerEntry;
use crate::PolicyEntry;

/// Turns node contexts into versioned [`Message`]s.
///
/// The version counter lives in memory and starts over with the process.
/// Agents must treat it as a debugging aid, not as a sequence number.
#[derive(Default)]
pub struct ConfigBuilder {
    version: Mutex<u64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(
        &self,
        ctx: &NodeContext,
        details: Option<ChangeDetails>,
        event_type: EventType,
    ) -> Message {
        let network = match &ctx.network {
            Some(n) => NetworkView {
                nodes: ctx.peers.iter().map(PeerEntry::from_node).collect(),
                policies: ctx.policies.iter().map(PolicyEntry::from).collect(),
                ..network_view(n)
            },
            None => NetworkView::default(),
        };

        Message {
            event_type,
            config_version: self.next_version(),
            timestamp: now_unix_secs(),
            change_details: details,
            current: current_node(&ctx.node),
            network,
        }
    }

    /// Tells `recipient` that `removed` left `network`.
    ///
    /// Only the removed peer is listed; the agent drops it from its table
    /// instead of replacing the whole peer set.
    pub fn build_peer_removed(
        &self,
        recipient: &Node,
        network: &Network,
        removed: &Node,
    ) -> Message {
        Message {
            event_type: EventType::NodeRemove,
            config_version: self.next_version(),
            timestamp: now_unix_secs(),
            change_details: None,
            current: CurrentNode {
                private_key: None,
                ..current_node(recipient)
            },
            network: NetworkView {
                nodes: vec![PeerEntry::from_node(removed)],
                ..network_view(network)
            },
        }
    }

    /// Last version handed out, `0` before the first message
    pub fn current_version(&self) -> u64 {
        *self.version.lock()
    }

    fn next_version(&self) -> String {
        let mut v = self.version.lock();
        *v += 1;
        format!("v{}", *v)
    }
}

fn current_node(node: &Node) -> CurrentNode {
    CurrentNode {
        name: node.meta.name.clone(),
        app_id: node.spec.app_id.clone(),
        address: node.spec.address.clone(),
        public_key: node.spec.public_key.clone(),
        private_key: Some(node.spec.private_key.clone()).filter(|k| !k.is_empty()),
    }
}

fn network_view(network: &Network) -> NetworkView {
    NetworkView {
        network_id: format!("{}/{}", network.meta.namespace, network.meta.name),
        network_name: network.meta.name.clone(),
        nodes: Vec::new(),
        policies: Vec::new(),
    }
}
