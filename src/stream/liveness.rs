use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::update_node_status;
use crate::NodeStatus;
use crate::Result;
use crate::StoreClient;
use crate::StoreConfig;

/// Writes node Active/Inactive status on transitions only.
///
/// Remembers the last status it wrote per node, so a node that keeps missing
/// probes is marked Inactive once, not on every miss.
pub struct LivenessTracker {
    store: Arc<dyn StoreClient>,
    config: StoreConfig,
    last: Mutex<HashMap<String, NodeStatus>>,
}

impl LivenessTracker {
    pub fn new(
        store: Arc<dyn StoreClient>,
        config: StoreConfig,
    ) -> Self {
        Self {
            store,
            config,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether this call changed the node's status
    pub async fn mark_active(
        &self,
        app_id: &str,
    ) -> Result<bool> {
        self.transition(app_id, NodeStatus::Active).await
    }

    /// Returns whether this call changed the node's status
    pub async fn mark_inactive(
        &self,
        app_id: &str,
    ) -> Result<bool> {
        self.transition(app_id, NodeStatus::Inactive).await
    }

    pub fn last_status(
        &self,
        app_id: &str,
    ) -> Option<NodeStatus> {
        self.last.lock().get(app_id).copied()
    }

    /// Drops the remembered status of a deleted node
    pub fn forget(
        &self,
        app_id: &str,
    ) {
        self.last.lock().remove(app_id);
    }

    async fn transition(
        &self,
        app_id: &str,
        status: NodeStatus,
    ) -> Result<bool> {
        if self.last_status(app_id) == Some(status) {
            return Ok(false);
        }

        let mut wrote = false;
        update_node_status(
            self.store.as_ref(),
            &self.config.namespace,
            app_id,
            &self.config,
            |n| {
                wrote = n.status.status != status;
                n.status.status = status;
                wrote
            },
        )
        .await?;

        self.last.lock().insert(app_id.to_string(), status);
        if wrote {
            info!(%app_id, ?status, "node liveness changed");
        }
        Ok(wrote)
    }
}
