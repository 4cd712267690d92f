//! Content-hash dedup in front of message delivery.
//!
//! Two consecutive deliveries to the same node never carry the same content:
//! the SHA-256 of what the agent acts on is remembered per node after each
//! successful send, and an identical message is skipped. Check, send and
//! record run under a per-node async lock so concurrent pushes to one node
//! cannot both pass the check.


use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::Mutex;
use tonic::async_trait;
use tracing::debug;

use crate::metrics::PUSHES_TOTAL;
use crate::Message;
use crate::Result;

/// Hands a message to the node's open stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    /// Fails with `DeliveryError::NotConnected` when the node has no stream
    async fn send(
        &self,
        app_id: &str,
        msg: Message,
    ) -> Result<()>;

    fn is_connected(
        &self,
        app_id: &str,
    ) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Same content as the last delivery; nothing was sent
    Unchanged,
}

pub struct PushEngine {
    delivery: Arc<dyn Delivery>,
    /// AppId -> hex SHA-256 of the last delivered content
    hashes: RwLock<HashMap<String, String>>,
    /// AppId -> lock serializing pushes to that node
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl PushEngine {
    pub fn new(delivery: Arc<dyn Delivery>) -> Self {
        Self {
            delivery,
            hashes: RwLock::new(HashMap::new()),
            in_flight: DashMap::new(),
        }
    }

    /// Delivers `msg` unless its content matches the last delivery.
    ///
    /// The remembered hash only moves after a successful send, so a failed
    /// delivery is retried with the same content.
    pub async fn push(
        &self,
        app_id: &str,
        msg: Message,
    ) -> Result<PushOutcome> {
        let hash = content_hash(&msg)?;

        let lock = self.in_flight.entry(app_id.to_string()).or_default().clone();
        let _guard = lock.lock().await;

        if self.hashes.read().get(app_id) == Some(&hash) {
            debug!(%app_id, event = ?msg.event_type, "content unchanged, push skipped");
            PUSHES_TOTAL.with_label_values(&["unchanged"]).inc();
            return Ok(PushOutcome::Unchanged);
        }

        let event = msg.event_type;
        let version = msg.config_version.clone();
        if let Err(e) = self.delivery.send(app_id, msg).await {
            PUSHES_TOTAL.with_label_values(&["failed"]).inc();
            return Err(e);
        }

        self.hashes.write().insert(app_id.to_string(), hash);
        PUSHES_TOTAL.with_label_values(&["delivered"]).inc();
        debug!(%app_id, ?event, %version, "config pushed");
        Ok(PushOutcome::Delivered)
    }

    /// Drops the node's remembered hash so the next push always goes out
    pub fn forget(
        &self,
        app_id: &str,
    ) {
        self.hashes.write().remove(app_id);
        self.in_flight.remove_if(app_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn last_hash(
        &self,
        app_id: &str,
    ) -> Option<String> {
        self.hashes.read().get(app_id).cloned()
    }

    pub fn is_connected(
        &self,
        app_id: &str,
    ) -> bool {
        self.delivery.is_connected(app_id)
    }
}

/// Hex SHA-256 over the agent-visible part of `msg`
pub fn content_hash(msg: &Message) -> Result<String> {
    let bytes = msg.content_bytes()?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
