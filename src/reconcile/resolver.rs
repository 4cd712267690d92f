use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::Kind;
use crate::Network;
use crate::Node;
use crate::NodePhase;
use crate::Policy;
use crate::Resource;
use crate::Result;
use crate::Selector;
use crate::StoreClient;
use crate::StoreError;

/// Snapshot of everything one node needs to know about its network.
///
/// Owned copies only: nothing here aliases store state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeContext {
    pub node: Node,
    /// Primary network; `None` when the node has not joined one yet
    pub network: Option<Network>,
    /// Routable members of the network other than `node`, ordered by AppId
    pub peers: Vec<Node>,
    /// Policies scoped to the network, ordered by name
    pub policies: Vec<Policy>,
}

impl NodeContext {
    pub fn app_id(&self) -> &str {
        self.node.app_id()
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(Node::app_id)
    }
}

/// Assembles [`NodeContext`] snapshots from the store
pub struct ContextResolver {
    store: Arc<dyn StoreClient>,
    namespace: String,
}

impl ContextResolver {
    pub fn new(
        store: Arc<dyn StoreClient>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Reads the node first, then resolves its context
    pub async fn resolve_app_id(
        &self,
        app_id: &str,
    ) -> Result<NodeContext> {
        let node = self.get_node(app_id).await?;
        self.resolve(node).await
    }

    pub async fn resolve(
        &self,
        node: Node,
    ) -> Result<NodeContext> {
        let Some(network_name) = node.primary_network().map(str::to_string) else {
            debug!(app_id = %node.app_id(), "node has no network");
            return Ok(NodeContext {
                node,
                network: None,
                peers: Vec::new(),
                policies: Vec::new(),
            });
        };

        let network = match self.get_network(&network_name).await {
            Ok(n) => n,
            Err(e) if e.is_not_found() => {
                warn!(app_id = %node.app_id(), network = %network_name, "primary network does not exist");
                return Ok(NodeContext {
                    node,
                    network: None,
                    peers: Vec::new(),
                    policies: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let peers = self.peers_of(&node, &network).await?;
        let policies = self.policies_of(&network_name).await?;

        Ok(NodeContext {
            node,
            network: Some(network),
            peers,
            policies,
        })
    }

    pub async fn get_node(
        &self,
        app_id: &str,
    ) -> Result<Node> {
        let r = self.store.get(Kind::Node, &self.namespace, app_id).await?;
        r.into_node().ok_or_else(|| unexpected(Kind::Node, app_id))
    }

    pub async fn get_network(
        &self,
        name: &str,
    ) -> Result<Network> {
        let r = self.store.get(Kind::Network, &self.namespace, name).await?;
        r.into_network().ok_or_else(|| unexpected(Kind::Network, name))
    }

    /// Members of `network` other than `node` that peers may route to:
    /// provisioned (not Pending) and Active
    async fn peers_of(
        &self,
        node: &Node,
        network: &Network,
    ) -> Result<Vec<Node>> {
        let all = self.store.list(Kind::Node, &self.namespace, &Selector::everything()).await?;

        let mut peers: Vec<Node> = all
            .into_iter()
            .filter_map(Resource::into_node)
            .filter(|n| n.app_id() != node.app_id() && network.has_member(n.app_id()))
            .filter(|n| n.status.phase != NodePhase::Pending && n.is_active())
            .collect();
        peers.sort_by(|a, b| a.app_id().cmp(b.app_id()));
        Ok(peers)
    }

    async fn policies_of(
        &self,
        network: &str,
    ) -> Result<Vec<Policy>> {
        let selector = Selector::everything().field("spec.network", network);
        let mut policies: Vec<Policy> = self
            .store
            .list(Kind::Policy, &self.namespace, &selector)
            .await?
            .into_iter()
            .filter_map(Resource::into_policy)
            .collect();
        policies.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(policies)
    }
}

fn unexpected(
    kind: Kind,
    name: &str,
) -> crate::Error {
    StoreError::Backend(format!("object {name} returned for {kind} has another kind")).into()
}
