//! Narrow client interface to the declarative resource store.
//!
//! The controller never assumes a particular backend: anything offering
//! list + watch + resource-version semantics can sit behind [`StoreClient`].
//! Writes use optimistic concurrency; a stale `resource_version` is reported
//! as [`StoreError::Conflict`] and callers re-read and retry through
//! [`update_with_retry`] / [`update_status_with_retry`].

mod memory;
mod retry;

pub use memory::*;
pub use retry::*;

#[cfg(test)]
mod memory_test;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Kind;
use crate::Resource;
use crate::Result;
use crate::Selector;

/// Kind of change reported by a store watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventType {
    Add,
    Update,
    Delete,
}

/// One notification from a store watch.
///
/// `old` is set for updates and deletes, `new` for adds and updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: Kind,
    pub event: WatchEventType,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

impl ResourceEvent {
    pub fn added(resource: Resource) -> Self {
        Self {
            kind: resource.kind(),
            event: WatchEventType::Add,
            old: None,
            new: Some(resource),
        }
    }

    pub fn updated(
        old: Resource,
        new: Resource,
    ) -> Self {
        Self {
            kind: new.kind(),
            event: WatchEventType::Update,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn deleted(resource: Resource) -> Self {
        Self {
            kind: resource.kind(),
            event: WatchEventType::Delete,
            old: Some(resource),
            new: None,
        }
    }

    /// The most recent state carried by the event
    pub fn object(&self) -> Option<&Resource> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

pub type ResourceEventStream = BoxStream<'static, ResourceEvent>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Returns `StoreError::NotFound` when the object does not exist
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource>;

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Resource>>;

    async fn create(
        &self,
        resource: Resource,
    ) -> Result<Resource>;

    /// Writes spec and metadata. Fails with `StoreError::Conflict` when
    /// `resource_version` no longer matches the stored object.
    async fn update(
        &self,
        resource: Resource,
    ) -> Result<Resource>;

    /// Writes the status part only, with the same concurrency check as `update`
    async fn update_status(
        &self,
        resource: Resource,
    ) -> Result<Resource>;

    /// Subscribes to add/update/delete notifications for one kind.
    ///
    /// The stream ends when the adapter can no longer guarantee it saw every
    /// event; the watcher treats that as `StoreError::WatchClosed`.
    async fn watch(
        &self,
        kind: Kind,
    ) -> Result<ResourceEventStream>;
}
