use std::collections::HashSet;

use parking_lot::Mutex;
use tonic::async_trait;

use crate::Delivery;
use crate::DeliveryError;
use crate::EventType;
use crate::Message;
use crate::Result;

/// [`Delivery`] that records what it was given
#[derive(Default)]
pub struct RecordingDelivery {
    connected: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connected(ids: &[&str]) -> Self {
        let d = Self::new();
        for id in ids {
            d.connect(id);
        }
        d
    }

    pub fn connect(
        &self,
        app_id: &str,
    ) {
        self.connected.lock().insert(app_id.to_string());
    }

    /// Sends to `app_id` fail until [`RecordingDelivery::heal`]
    pub fn fail_for(
        &self,
        app_id: &str,
    ) {
        self.failing.lock().insert(app_id.to_string());
    }

    pub fn heal(
        &self,
        app_id: &str,
    ) {
        self.failing.lock().remove(app_id);
    }

    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(
        &self,
        app_id: &str,
    ) -> Vec<Message> {
        self.sent.lock().iter().filter(|(id, _)| id == app_id).map(|(_, m)| m.clone()).collect()
    }

    pub fn count_of(
        &self,
        event: EventType,
    ) -> usize {
        self.sent.lock().iter().filter(|(_, m)| m.event_type == event).count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send(
        &self,
        app_id: &str,
        msg: Message,
    ) -> Result<()> {
        if !self.is_connected(app_id) {
            return Err(DeliveryError::NotConnected(app_id.to_string()).into());
        }
        if self.failing.lock().contains(app_id) {
            return Err(DeliveryError::ChannelClosed(app_id.to_string()).into());
        }
        self.sent.lock().push((app_id.to_string(), msg));
        Ok(())
    }

    fn is_connected(
        &self,
        app_id: &str,
    ) -> bool {
        self.connected.lock().contains(app_id)
    }
}
