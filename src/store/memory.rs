use std::collections::BTreeMap;
use std::future::ready;
use std::time::SystemTime;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tonic::async_trait;
use tracing::trace;
use tracing::warn;

use super::ResourceEvent;
use super::ResourceEventStream;
use super::StoreClient;
use crate::Kind;
use crate::Resource;
use crate::Result;
use crate::Selector;
use crate::StoreError;

const EVENT_BUFFER: usize = 1024;

type ObjectKey = (Kind, String, String);

struct State {
    objects: BTreeMap<ObjectKey, Resource>,
    last_version: u64,
}

/// In-process [`StoreClient`] adapter.
///
/// Every write bumps a store-wide resource version and is published to
/// watchers in write order. A watcher that falls more than the event buffer
/// behind has its stream ended instead of silently missing events. Used by
/// the embedded binary mode and by tests.
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<ResourceEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_event_buffer(EVENT_BUFFER)
    }

    /// Store whose watchers may fall at most `capacity` events behind
    pub fn with_event_buffer(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                last_version: 0,
            }),
            events,
        }
    }

    /// Removes an object and publishes the Delete event
    pub fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource> {
        let mut state = self.state.lock();
        let removed = state
            .objects
            .remove(&key(kind, namespace, name))
            .ok_or_else(|| not_found(kind, name))?;
        self.publish(ResourceEvent::deleted(removed.clone()));
        Ok(removed)
    }

    /// Number of stored objects of one kind
    pub fn count(
        &self,
        kind: Kind,
    ) -> usize {
        self.state.lock().objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    fn publish(
        &self,
        event: ResourceEvent,
    ) {
        trace!(kind = %event.kind, event = ?event.event, "publishing store event");
        // No subscribers is fine: nobody is watching yet
        let _ = self.events.send(event);
    }

    fn write(
        &self,
        resource: Resource,
        status_only: bool,
    ) -> Result<Resource> {
        let kind = resource.kind();
        let meta = resource.meta();
        let k = key(kind, &meta.namespace, &meta.name);

        let mut state = self.state.lock();
        let existing = state.objects.get(&k).cloned().ok_or_else(|| not_found(kind, &meta.name))?;

        if existing.meta().resource_version != meta.resource_version {
            return Err(StoreError::Conflict {
                kind,
                name: meta.name.clone(),
            }
            .into());
        }

        let mut next = if status_only {
            match (&existing, resource) {
                (Resource::Node(current), Resource::Node(incoming)) => {
                    let mut n = current.clone();
                    n.status = incoming.status;
                    Resource::Node(n)
                }
                _ => {
                    return Err(StoreError::Backend(format!("{kind} has no status")).into());
                }
            }
        } else {
            match (&existing, resource) {
                // Status is only writable through update_status
                (Resource::Node(current), Resource::Node(mut incoming)) => {
                    incoming.status = current.status.clone();
                    Resource::Node(incoming)
                }
                (_, incoming) => incoming,
            }
        };

        state.last_version += 1;
        let m = next.meta_mut();
        m.resource_version = state.last_version.to_string();
        m.creation_timestamp = existing.meta().creation_timestamp;

        state.objects.insert(k, next.clone());
        self.publish(ResourceEvent::updated(existing, next.clone()));
        Ok(next)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource> {
        self.state
            .lock()
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| not_found(kind, name))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Resource>> {
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), r)| *k == kind && ns == namespace && selector.matches(r))
            .map(|(_, r)| r.clone())
            .collect())
    }

    /// Stamps `creation_timestamp` unless the caller already set one
    async fn create(
        &self,
        mut resource: Resource,
    ) -> Result<Resource> {
        let kind = resource.kind();
        let k = key(kind, &resource.meta().namespace, resource.name());

        let mut state = self.state.lock();
        if state.objects.contains_key(&k) {
            return Err(StoreError::AlreadyExists {
                kind,
                name: resource.name().to_string(),
            }
            .into());
        }

        state.last_version += 1;
        let meta = resource.meta_mut();
        meta.resource_version = state.last_version.to_string();
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(SystemTime::now());
        }

        state.objects.insert(k, resource.clone());
        self.publish(ResourceEvent::added(resource.clone()));
        Ok(resource)
    }

    async fn update(
        &self,
        resource: Resource,
    ) -> Result<Resource> {
        self.write(resource, false)
    }

    async fn update_status(
        &self,
        resource: Resource,
    ) -> Result<Resource> {
        self.write(resource, true)
    }

    async fn watch(
        &self,
        kind: Kind,
    ) -> Result<ResourceEventStream> {
        let stream = BroadcastStream::new(self.events.subscribe())
            .take_while(move |r| {
                if let Err(BroadcastStreamRecvError::Lagged(n)) = r {
                    warn!(%kind, skipped = *n, "store watcher lagged behind, closing watch");
                    return ready(false);
                }
                ready(true)
            })
            .filter_map(move |r| ready(r.ok().filter(|event| event.kind == kind)));
        Ok(stream.boxed())
    }
}

fn key(
    kind: Kind,
    namespace: &str,
    name: &str,
) -> ObjectKey {
    (kind, namespace.to_string(), name.to_string())
}

fn not_found(
    kind: Kind,
    name: &str,
) -> crate::Error {
    StoreError::NotFound {
        kind,
        name: name.to_string(),
    }
    .into()
}
