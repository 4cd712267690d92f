//! Turns queued store changes into pushes to connected agents.
//!
//! One reconcile round per work item:
//!
//! ```text
//! WorkItem ─► resolve NodeContext ─► detect change ─► build Message ─► push (dedup) ─► stream
//!                                          │
//!                                          └─ "no changes": stop, nothing is built
//! ```
//!
//! Every round is idempotent: the queue delivers at least once and a failed
//! round is simply run again.

mod builder;
mod detector;
mod resolver;

pub use builder::*;
pub use detector::*;
pub use resolver::*;


use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::metrics::RECONCILE_TOTAL;
use crate::update_node_status;
use crate::update_with_retry;
use crate::ChangeDetails;
use crate::ChangeKind;
use crate::EventType;
use crate::Handler;
use crate::Kind;
use crate::Network;
use crate::Node;
use crate::NodePhase;
use crate::PushEngine;
use crate::PushOutcome;
use crate::Resource;
use crate::Result;
use crate::StoreClient;
use crate::StoreConfig;
use crate::StreamLifecycle;
use crate::WorkQueue;

/// What happened to the object a work item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemEvent {
    Add,
    Update,
    Delete,
    /// Refresh one node's full view after something around it changed
    Resync,
}

/// Unit of work on the reconcile queue.
///
/// Identity is `(kind, key, event, old rv, new rv)`: the same store event
/// enqueued twice collapses into one item, while later events for the same
/// object stay distinct.
#[derive(Clone)]
pub struct WorkItem {
    pub kind: Kind,
    /// Object name; the AppId for nodes
    pub key: String,
    pub event: ItemEvent,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

impl WorkItem {
    pub fn new(
        kind: Kind,
        key: impl Into<String>,
        event: ItemEvent,
        old: Option<Resource>,
        new: Option<Resource>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            event,
            old,
            new,
        }
    }

    pub fn resync(app_id: impl Into<String>) -> Self {
        Self::new(Kind::Node, app_id, ItemEvent::Resync, None, None)
    }

    pub fn old_node(&self) -> Option<&Node> {
        self.old.as_ref().and_then(Resource::as_node)
    }

    fn identity(&self) -> (Kind, &str, ItemEvent, Option<&str>, Option<&str>) {
        fn rv(r: &Option<Resource>) -> Option<&str> {
            r.as_ref().map(|r| r.meta().resource_version.as_str())
        }
        (self.kind, &self.key, self.event, rv(&self.old), rv(&self.new))
    }
}

impl PartialEq for WorkItem {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for WorkItem {}

impl Hash for WorkItem {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let (kind, key, event, old_rv, new_rv) = self.identity();
        write!(f, "{kind}/{key} {event:?} rv {old_rv:?} -> {new_rv:?}")
    }
}

pub struct Reconciler {
    store: Arc<dyn StoreClient>,
    config: StoreConfig,
    resolver: ContextResolver,
    detector: Arc<ChangeDetector>,
    builder: ConfigBuilder,
    push: Arc<PushEngine>,
    queue: Arc<WorkQueue<WorkItem>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StoreClient>,
        config: StoreConfig,
        detector: Arc<ChangeDetector>,
        push: Arc<PushEngine>,
        queue: Arc<WorkQueue<WorkItem>>,
    ) -> Self {
        Self {
            resolver: ContextResolver::new(store.clone(), config.namespace.clone()),
            store,
            config,
            detector,
            builder: ConfigBuilder::new(),
            push,
            queue,
        }
    }

    #[instrument(skip(self, item), fields(kind = %item.kind, key = %item.key, event = ?item.event))]
    pub async fn reconcile(
        &self,
        item: &WorkItem,
    ) -> Result<()> {
        match (item.kind, item.event) {
            (Kind::Node, ItemEvent::Add) => self.node_added(&item.key).await,
            (Kind::Node, ItemEvent::Update) => self.node_updated(item.old_node(), &item.key).await,
            (Kind::Node, ItemEvent::Delete) => match item.old_node() {
                Some(node) => self.node_deleted(node).await,
                None => {
                    warn!("delete without the removed object, nothing to broadcast");
                    Ok(())
                }
            },
            (Kind::Node, ItemEvent::Resync) => self.resync(&item.key).await,
            (Kind::Network, _) => {
                self.network_changed(item);
                Ok(())
            }
            (Kind::Policy, _) => self.policy_changed(item).await,
        }
    }

    async fn node_added(
        &self,
        app_id: &str,
    ) -> Result<()> {
        let Some(node) = self.fresh_node(app_id).await? else {
            return Ok(());
        };

        self.sync_memberships(&node, &[]).await?;
        let ctx = self.resolver.resolve(node).await?;
        self.detector.remember(ctx.clone());

        if self.push.is_connected(app_id) {
            let details = ChangeDetails::new(ChangeKind::Full, "node added");
            let msg = self.builder.build(&ctx, Some(details), EventType::NodeAdd);
            self.push.push(app_id, msg).await?;
        }

        self.resync_members(&ctx.node.spec.networks, app_id).await
    }

    async fn node_updated(
        &self,
        old: Option<&Node>,
        app_id: &str,
    ) -> Result<()> {
        let Some(node) = self.fresh_node(app_id).await? else {
            return Ok(());
        };

        let left: Vec<String> = old
            .map(|o| {
                o.spec
                    .networks
                    .iter()
                    .filter(|n| !node.spec.networks.contains(n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        self.sync_memberships(&node, &left).await?;
        let ctx = self.resolver.resolve(node).await?;

        let details = self.detector.detect(old, &ctx);
        if details.is_none() {
            debug!(reason = %details.summary, "no changes, push suppressed");
            return Ok(());
        }
        info!(change = ?details.kind, "{}", details.summary);

        if self.push.is_connected(app_id) {
            let event = details.kind.event_type();
            let msg = self.builder.build(&ctx, Some(details), event);
            self.push.push(app_id, msg).await?;
        }

        // Peers of every network involved see the new address, key or membership
        let mut networks = ctx.node.spec.networks.clone();
        networks.extend(left);
        self.resync_members(&networks, app_id).await
    }

    async fn node_deleted(
        &self,
        node: &Node,
    ) -> Result<()> {
        let app_id = node.app_id();
        self.push.forget(app_id);
        self.detector.purge(app_id);

        let sent = self.broadcast_peer_removed(node).await?;
        info!(%app_id, peers = sent, "node removal broadcast");

        for name in &node.spec.networks {
            self.leave(name, app_id).await?;
        }
        Ok(())
    }

    /// Pushes the node's full current view, if it is connected
    async fn resync(
        &self,
        app_id: &str,
    ) -> Result<()> {
        if !self.push.is_connected(app_id) {
            trace!(%app_id, "not connected, resync deferred to next watch");
            return Ok(());
        }

        let ctx = match self.resolver.resolve_app_id(app_id).await {
            Ok(ctx) => ctx,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let msg = self.builder.build(&ctx, None, EventType::PeerUpdate);
        self.push.push(app_id, msg).await?;
        Ok(())
    }

    fn network_changed(
        &self,
        item: &WorkItem,
    ) {
        let members: BTreeSet<&String> = [&item.old, &item.new]
            .into_iter()
            .flatten()
            .filter_map(|r| match r {
                Resource::Network(n) => Some(n.spec.nodes.iter()),
                _ => None,
            })
            .flatten()
            .collect();

        debug!(members = members.len(), "network changed, resyncing members");
        for m in members {
            self.queue.add(WorkItem::resync(m.as_str()));
        }
    }

    /// Rolls a policy change out to every member of the affected networks.
    ///
    /// Each Ready member goes through `UpdatingPolicy` and back; the return
    /// to Ready is what the change detector reports as a policy change.
    async fn policy_changed(
        &self,
        item: &WorkItem,
    ) -> Result<()> {
        let networks: BTreeSet<&str> = [&item.old, &item.new]
            .into_iter()
            .flatten()
            .filter_map(|r| match r {
                Resource::Policy(p) => Some(p.spec.network.as_str()),
                _ => None,
            })
            .collect();

        for name in networks {
            let Some(network) = self.fresh_network(name).await? else {
                continue;
            };
            for member in &network.spec.nodes {
                self.roll_out_policy(member).await?;
            }
        }
        Ok(())
    }

    async fn roll_out_policy(
        &self,
        app_id: &str,
    ) -> Result<()> {
        let store = self.store.as_ref();
        let ns = &self.config.namespace;

        let flagged = update_node_status(store, ns, app_id, &self.config, |n| {
            if n.status.phase == NodePhase::Ready {
                n.status.phase = NodePhase::UpdatingPolicy;
                return true;
            }
            false
        })
        .await;

        match flagged {
            // Pending nodes get policies with their first full view
            Ok(n) if n.status.phase != NodePhase::UpdatingPolicy => return Ok(()),
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        update_node_status(store, ns, app_id, &self.config, |n| {
            if n.status.phase == NodePhase::UpdatingPolicy {
                n.status.phase = NodePhase::Ready;
                return true;
            }
            false
        })
        .await?;
        Ok(())
    }

    /// Sends `NodeRemove` for `node` to every other connected member of its
    /// networks. Returns how many pushes went out.
    pub async fn broadcast_peer_removed(
        &self,
        node: &Node,
    ) -> Result<usize> {
        let mut sent = 0;
        let mut last_err = None;

        for name in &node.spec.networks {
            let Some(network) = self.fresh_network(name).await? else {
                continue;
            };

            for member in network.spec.nodes.iter().filter(|m| *m != node.app_id()) {
                if !self.push.is_connected(member) {
                    continue;
                }
                let Some(recipient) = self.fresh_node(member).await? else {
                    continue;
                };

                let msg = self.builder.build_peer_removed(&recipient, &network, node);
                match self.push.push(member, msg).await {
                    Ok(PushOutcome::Delivered) => sent += 1,
                    Ok(PushOutcome::Unchanged) => {}
                    Err(e) => {
                        warn!(peer = %member, "peer removal not delivered: {e}");
                        last_err = Some(e);
                    }
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    /// Queues a resync for every member of `networks` except `except`
    async fn resync_members(
        &self,
        networks: &[String],
        except: &str,
    ) -> Result<()> {
        for name in networks {
            let Some(network) = self.fresh_network(name).await? else {
                continue;
            };
            for m in network.spec.nodes.iter().filter(|m| *m != except) {
                self.queue.add(WorkItem::resync(m.as_str()));
            }
        }
        Ok(())
    }

    /// Mirrors the node's network references into the networks' member lists
    async fn sync_memberships(
        &self,
        node: &Node,
        left: &[String],
    ) -> Result<()> {
        for name in &node.spec.networks {
            self.join(name, node.app_id()).await?;
        }
        for name in left {
            self.leave(name, node.app_id()).await?;
        }
        Ok(())
    }

    async fn join(
        &self,
        network: &str,
        app_id: &str,
    ) -> Result<()> {
        self.edit_members(network, |n| n.add_member(app_id)).await
    }

    async fn leave(
        &self,
        network: &str,
        app_id: &str,
    ) -> Result<()> {
        self.edit_members(network, |n| n.remove_member(app_id)).await
    }

    async fn edit_members<F>(
        &self,
        network: &str,
        mut edit: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Network) -> bool,
    {
        let result = update_with_retry(
            self.store.as_ref(),
            Kind::Network,
            &self.config.namespace,
            network,
            &self.config,
            |r| match r {
                Resource::Network(n) => edit(n),
                _ => false,
            },
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(%network, "network referenced by a node does not exist");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fresh_node(
        &self,
        app_id: &str,
    ) -> Result<Option<Node>> {
        match self.resolver.get_node(app_id).await {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.is_not_found() => {
                debug!(%app_id, "node no longer exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fresh_network(
        &self,
        name: &str,
    ) -> Result<Option<Network>> {
        match self.resolver.get_network(name).await {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Handler<WorkItem> for Reconciler {
    async fn handle(
        &self,
        item: &WorkItem,
    ) -> Result<()> {
        let result = self.reconcile(item).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        RECONCILE_TOTAL.with_label_values(&[item.kind.as_str(), outcome]).inc();
        result
    }
}

#[async_trait]
impl StreamLifecycle for Reconciler {
    /// Full snapshot for a freshly opened Watch stream. The node's hash is
    /// cleared first, so a reconnect always receives it.
    async fn on_open(
        &self,
        app_id: &str,
    ) -> Result<()> {
        self.push.forget(app_id);

        let ctx = self.resolver.resolve_app_id(app_id).await?;
        self.detector.remember(ctx.clone());

        let details = ChangeDetails::new(ChangeKind::Full, "initial sync");
        let msg = self.builder.build(&ctx, Some(details), EventType::Init);
        self.push.push(app_id, msg).await?;
        Ok(())
    }

    async fn on_close(
        &self,
        app_id: &str,
    ) {
        self.push.forget(app_id);
    }

    async fn on_disconnect(
        &self,
        app_id: &str,
    ) -> Result<()> {
        let Some(node) = self.fresh_node(app_id).await? else {
            return Ok(());
        };
        let sent = self.broadcast_peer_removed(&node).await?;
        info!(%app_id, peers = sent, "disconnected node removed from peers");
        Ok(())
    }
}
