use serde::Deserialize;
use serde::Serialize;

use super::ObjectMeta;

/// Provisioning phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodePhase {
    #[default]
    Pending,
    Ready,
    /// Set while a policy change is being rolled out to the node's network
    UpdatingPolicy,
}

impl NodePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Pending => "Pending",
            NodePhase::Ready => "Ready",
            NodePhase::UpdatingPolicy => "UpdatingPolicy",
        }
    }
}

/// Liveness as last observed through the keepalive protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    #[default]
    Inactive,
}

/// How the agent reaches its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectType {
    #[default]
    Direct,
    Relay,
    Drp,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Stable identity of the node for its whole membership
    pub app_id: String,
    pub address: String,
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    /// Names of the networks the node belongs to; the first one is primary
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub connect_type: ConnectType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub phase: NodePhase,
    pub status: NodeStatus,
}

/// A mesh participant. Stored under its AppId as name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub meta: ObjectMeta,
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeState,
}

impl Node {
    pub fn new(
        namespace: impl Into<String>,
        app_id: impl Into<String>,
        address: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        let app_id = app_id.into();
        Self {
            meta: ObjectMeta::new(namespace, app_id.clone()),
            spec: NodeSpec {
                app_id,
                address: address.into(),
                public_key: public_key.into(),
                ..Default::default()
            },
            status: NodeState::default(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.spec.app_id
    }

    /// The network whose peers and policies are pushed to this node
    pub fn primary_network(&self) -> Option<&str> {
        self.spec.networks.first().map(String::as_str)
    }

    pub fn is_ready(&self) -> bool {
        self.status.phase == NodePhase::Ready
    }

    pub fn is_active(&self) -> bool {
        self.status.status == NodeStatus::Active
    }

    /// Address and key material both unchanged
    pub fn same_addressing(
        &self,
        other: &Node,
    ) -> bool {
        self.spec.address == other.spec.address
            && self.spec.public_key == other.spec.public_key
            && self.spec.private_key == other.spec.private_key
    }
}
