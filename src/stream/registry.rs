use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tonic::async_trait;
use tracing::debug;
use tracing::info;

use crate::Delivery;
use crate::DeliveryError;
use crate::Message;
use crate::Result;
use crate::StreamConfig;

struct Session {
    id: u64,
    sender: mpsc::Sender<Message>,
}

/// What a Watch handler gets back from [`StreamRegistry::register`]
pub struct Registration {
    pub session_id: u64,
    pub receiver: mpsc::Receiver<Message>,
}

/// Per-node delivery channels bound to open Watch streams.
///
/// Each registration is a session. Registering again replaces the previous
/// session; its handler sees its channel close and exits. A handler only ever
/// removes its own session, so a fast reconnect survives the old handler's
/// cleanup.
pub struct StreamRegistry {
    sessions: DashMap<String, Session>,
    next_session: AtomicU64,
    capacity: usize,
    send_timeout: Duration,
}

impl StreamRegistry {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            capacity: config.channel_capacity.max(1),
            send_timeout: config.delivery_timeout(),
        }
    }

    pub fn register(
        &self,
        app_id: &str,
    ) -> Registration {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = self.sessions.insert(app_id.to_string(), Session { id, sender }) {
            info!(%app_id, old_session = old.id, session = id, "watch session replaced");
        } else {
            debug!(%app_id, session = id, "watch session registered");
        }

        Registration {
            session_id: id,
            receiver,
        }
    }

    /// Removes the node's session if it is still `session_id`
    pub fn deregister_session(
        &self,
        app_id: &str,
        session_id: u64,
    ) -> bool {
        self.sessions.remove_if(app_id, |_, s| s.id == session_id).is_some()
    }

    /// Removes whatever session the node has
    pub fn remove(
        &self,
        app_id: &str,
    ) -> bool {
        self.sessions.remove(app_id).is_some()
    }

    pub fn is_registered(
        &self,
        app_id: &str,
    ) -> bool {
        self.sessions.contains_key(app_id)
    }

    pub fn session_id(
        &self,
        app_id: &str,
    ) -> Option<u64> {
        self.sessions.get(app_id).map(|s| s.id)
    }

    /// AppIds with an open stream, sorted
    pub fn connected(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl Delivery for StreamRegistry {
    async fn send(
        &self,
        app_id: &str,
        msg: Message,
    ) -> Result<()> {
        // Clone out so no map guard is held across the await
        let sender = self
            .sessions
            .get(app_id)
            .map(|s| s.sender.clone())
            .ok_or_else(|| DeliveryError::NotConnected(app_id.to_string()))?;

        sender.send_timeout(msg, self.send_timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::Timeout {
                app_id: app_id.to_string(),
                duration: self.send_timeout,
            },
            SendTimeoutError::Closed(_) => DeliveryError::ChannelClosed(app_id.to_string()),
        })?;
        Ok(())
    }

    fn is_connected(
        &self,
        app_id: &str,
    ) -> bool {
        self.is_registered(app_id)
    }
}
