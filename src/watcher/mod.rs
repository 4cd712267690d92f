//! Store watch → work queue.
//!
//! Filters the noise a watch delivers before anything reaches the queue:
//! - Add of an object created long before it was observed is a resync echo
//! - Update with an unchanged resource version is not a mutation
//! - Node updates are only interesting once the node is Ready
//!
//! Deletes always go through, and purge the node's cached context and stream
//! session right away so stale updates still in the queue cannot revive them.


use std::sync::Arc;
use std::time::SystemTime;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::utils::time::age;
use crate::ChangeDetector;
use crate::ItemEvent;
use crate::Kind;
use crate::LivenessTracker;
use crate::NodePhase;
use crate::Resource;
use crate::ResourceEvent;
use crate::Result;
use crate::StoreClient;
use crate::StoreError;
use crate::StreamRegistry;
use crate::WatchEventType;
use crate::WatcherConfig;
use crate::WorkItem;
use crate::WorkQueue;

pub struct ChangeWatcher {
    store: Arc<dyn StoreClient>,
    queue: Arc<WorkQueue<WorkItem>>,
    detector: Arc<ChangeDetector>,
    registry: Arc<StreamRegistry>,
    liveness: Arc<LivenessTracker>,
    config: WatcherConfig,
}

impl ChangeWatcher {
    pub fn new(
        store: Arc<dyn StoreClient>,
        queue: Arc<WorkQueue<WorkItem>>,
        detector: Arc<ChangeDetector>,
        registry: Arc<StreamRegistry>,
        liveness: Arc<LivenessTracker>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            queue,
            detector,
            registry,
            liveness,
            config,
        }
    }

    /// Applies the filters to one event observed at `now`.
    /// Returns whether a work item was enqueued.
    pub fn handle_event(
        &self,
        event: ResourceEvent,
        now: SystemTime,
    ) -> bool {
        let Some(key) = event.object().map(|r| r.name().to_string()) else {
            return false;
        };

        match event.event {
            WatchEventType::Add => {
                let created = event.new.as_ref().and_then(|r| r.meta().creation_timestamp);
                if let Some(created) = created {
                    if age(created, now) > self.config.stale_add_threshold() {
                        trace!(kind = %event.kind, %key, "stale add discarded");
                        return false;
                    }
                }
            }
            WatchEventType::Update => {
                let rv = |r: &Option<Resource>| r.as_ref().map(|r| r.meta().resource_version.clone());
                if rv(&event.old) == rv(&event.new) {
                    trace!(kind = %event.kind, %key, "update without new resource version discarded");
                    return false;
                }
                if event.kind == Kind::Node {
                    let phase = event.new.as_ref().and_then(Resource::as_node).map(|n| n.status.phase);
                    if phase != Some(NodePhase::Ready) {
                        trace!(%key, ?phase, "node not ready, update discarded");
                        return false;
                    }
                }
            }
            WatchEventType::Delete => {
                if event.kind == Kind::Node {
                    self.detector.purge(&key);
                    self.registry.remove(&key);
                    self.liveness.forget(&key);
                }
            }
        }

        let item_event = match event.event {
            WatchEventType::Add => ItemEvent::Add,
            WatchEventType::Update => ItemEvent::Update,
            WatchEventType::Delete => ItemEvent::Delete,
        };
        debug!(kind = %event.kind, %key, event = ?item_event, "enqueue");
        self.queue.add(WorkItem::new(event.kind, key, item_event, event.old, event.new));
        true
    }

    /// Feeds Node, Network and Policy watch events to the queue until
    /// `shutdown` fires
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut nodes = self.store.watch(Kind::Node).await?;
        let mut networks = self.store.watch(Kind::Network).await?;
        let mut policies = self.store.watch(Kind::Policy).await?;
        info!("watching nodes, networks and policies");

        loop {
            let (kind, event) = tokio::select! {
                _ = shutdown.changed() => {
                    info!("watcher shutting down");
                    return Ok(());
                }
                e = nodes.next() => (Kind::Node, e),
                e = networks.next() => (Kind::Network, e),
                e = policies.next() => (Kind::Policy, e),
            };

            match event {
                Some(event) => {
                    self.handle_event(event, SystemTime::now());
                }
                None => return Err(StoreError::WatchClosed(kind).into()),
            }
        }
    }
}
