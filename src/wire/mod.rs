//! Messages exchanged with agents over the Watch and Keepalive streams.
//!
//! Field names are stable across versions. `private_key` is only ever filled
//! in for the node a message is addressed to, never in peer entries.


use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Node;
use crate::Policy;
use crate::PolicyAction;
use crate::Rule;

/// What a pushed message describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Full snapshot sent when a Watch stream opens
    Init,
    NodeAdd,
    NodeUpdate,
    /// A peer left; the network carries only the removed peer
    NodeRemove,
    #[serde(rename = "IPChange")]
    IpChange,
    NetworkChange,
    MembershipChange,
    PolicyChange,
    /// The recipient's peer list changed because of another node
    PeerUpdate,
}

/// Classification produced by the change detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    None,
    NodeUpdate,
    AddressChanged,
    MembershipChanged,
    NetworkChanged,
    PolicyChanged,
    Full,
}

impl ChangeKind {
    /// Event type of the message sent to the changed node itself
    pub fn event_type(&self) -> EventType {
        match self {
            ChangeKind::AddressChanged => EventType::IpChange,
            ChangeKind::MembershipChanged => EventType::MembershipChange,
            ChangeKind::NetworkChanged => EventType::NetworkChange,
            ChangeKind::PolicyChanged => EventType::PolicyChange,
            ChangeKind::Full => EventType::Init,
            ChangeKind::None | ChangeKind::NodeUpdate => EventType::NodeUpdate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetails {
    pub kind: ChangeKind,
    /// Human readable summary for agent logs
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks_added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks_removed: Vec<String>,
}

impl ChangeDetails {
    pub fn new(
        kind: ChangeKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            summary: summary.into(),
            networks_added: Vec::new(),
            networks_removed: Vec::new(),
        }
    }

    pub fn none() -> Self {
        Self::new(ChangeKind::None, "no changes")
    }

    pub fn is_none(&self) -> bool {
        self.kind == ChangeKind::None
    }
}

/// The recipient node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentNode {
    pub name: String,
    pub app_id: String,
    pub address: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// A peer as seen by the recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub name: String,
    pub app_id: String,
    pub address: String,
    pub public_key: String,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,
}

impl PeerEntry {
    pub fn from_node(node: &Node) -> Self {
        Self {
            name: node.meta.name.clone(),
            app_id: node.spec.app_id.clone(),
            address: node.spec.address.clone(),
            public_key: node.spec.public_key.clone(),
            allowed_ips: allowed_ips(&node.spec.address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub policy_name: String,
    pub action: PolicyAction,
    pub ingress: Vec<Rule>,
    pub egress: Vec<Rule>,
}

impl From<&Policy> for PolicyEntry {
    fn from(p: &Policy) -> Self {
        Self {
            policy_name: p.meta.name.clone(),
            action: p.spec.action,
            ingress: p.spec.ingress.clone(),
            egress: p.spec.egress.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkView {
    pub network_id: String,
    pub network_name: String,
    pub nodes: Vec<PeerEntry>,
    pub policies: Vec<PolicyEntry>,
}

/// Versioned network view pushed to one agent. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub event_type: EventType,
    /// Advisory, process-local version; resets on controller restart
    pub config_version: String,
    /// Unix seconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_details: Option<ChangeDetails>,
    pub current: CurrentNode,
    pub network: NetworkView,
}

/// The part of a message an agent acts on
#[derive(Serialize)]
struct Content<'a> {
    current: &'a CurrentNode,
    network: &'a NetworkView,
}

impl Message {
    /// Canonical bytes of the agent-visible content, excluding version,
    /// timestamp, event type and change details
    pub fn content_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&Content {
            current: &self.current,
            network: &self.network,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// First message on a Watch stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub app_id: String,
}

/// Sent by the agent to identify itself, then as the answer to every probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepaliveRequest {
    pub app_id: String,
    pub pub_key: String,
}

/// Server challenge on the Keepalive stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepaliveProbe {
    pub pub_key: String,
}

/// Host route for a node address: `/32` for IPv4, `/128` for IPv6.
///
/// Addresses already carrying a prefix are kept as is; anything unparseable
/// yields no allowed IPs.
pub fn allowed_ips(address: &str) -> Vec<String> {
    if address.contains('/') {
        return vec![address.to_string()];
    }
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => vec![format!("{ip}/32")],
        Ok(IpAddr::V6(ip)) => vec![format!("{ip}/128")],
        Err(_) => Vec::new(),
    }
}
