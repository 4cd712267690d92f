use std::collections::BTreeSet;
use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use super::NodeContext;
use crate::ChangeDetails;
use crate::ChangeKind;
use crate::Node;
use crate::NodePhase;
use crate::NodeStatus;

/// Classifies the change between two versions of a node.
///
/// Rules are evaluated in order and the first match wins, so e.g. an address
/// change that comes with a different number of networks is reported as a
/// membership change.
pub fn classify(
    old: &Node,
    new: &Node,
) -> ChangeDetails {
    if new.status.phase != NodePhase::Ready {
        return ChangeDetails::new(ChangeKind::None, "node not ready");
    }
    if new.status.status != NodeStatus::Active {
        return ChangeDetails::new(ChangeKind::None, "node not active");
    }

    let old_networks = &old.spec.networks;
    let new_networks = &new.spec.networks;

    if old.same_addressing(new)
        && old_networks == new_networks
        && old.status.phase == new.status.phase
        && other_attributes_differ(old, new)
    {
        return ChangeDetails::new(ChangeKind::NodeUpdate, "node attributes changed");
    }

    if old_networks.len() != new_networks.len() {
        return with_membership_diff(
            ChangeDetails::new(ChangeKind::MembershipChanged, "network membership changed"),
            old_networks,
            new_networks,
        );
    }

    if old.spec.address != new.spec.address {
        return ChangeDetails::new(
            ChangeKind::AddressChanged,
            format!("address changed from {} to {}", old.spec.address, new.spec.address),
        );
    }

    if old.primary_network() != new.primary_network() {
        return with_membership_diff(
            ChangeDetails::new(ChangeKind::NetworkChanged, "primary network changed"),
            old_networks,
            new_networks,
        );
    }

    if old.status.phase == NodePhase::UpdatingPolicy && new.status.phase == NodePhase::Ready {
        return ChangeDetails::new(ChangeKind::PolicyChanged, "network policies changed");
    }

    let diff = with_membership_diff(
        ChangeDetails::new(ChangeKind::NodeUpdate, "network membership changed"),
        old_networks,
        new_networks,
    );
    if !diff.networks_added.is_empty() || !diff.networks_removed.is_empty() {
        return diff;
    }
    // Same networks in the same count: only key rotation can be left
    if !old.same_addressing(new) {
        return ChangeDetails::new(ChangeKind::NodeUpdate, "key material rotated");
    }

    ChangeDetails::none()
}

/// Labels, connect type or liveness; resource version is not a change
fn other_attributes_differ(
    old: &Node,
    new: &Node,
) -> bool {
    old.meta.labels != new.meta.labels
        || old.spec.connect_type != new.spec.connect_type
        || old.status.status != new.status.status
}

fn with_membership_diff(
    mut details: ChangeDetails,
    old: &[String],
    new: &[String],
) -> ChangeDetails {
    let old: BTreeSet<&String> = old.iter().collect();
    let new: BTreeSet<&String> = new.iter().collect();

    details.networks_added = new.difference(&old).map(|s| s.to_string()).collect();
    details.networks_removed = old.difference(&new).map(|s| s.to_string()).collect();
    details
}

/// Last-seen context per node, used to diff the next update against.
#[derive(Default)]
pub struct ChangeDetector {
    cache: Mutex<HashMap<String, NodeContext>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `current` and classifies it against what was seen before.
    ///
    /// `old_node` is the pre-update object carried by the store event; the
    /// cached snapshot's node stands in when the event has none. A node that
    /// was never seen yields no change: bootstrap belongs to the add path.
    pub fn detect(
        &self,
        old_node: Option<&Node>,
        current: &NodeContext,
    ) -> ChangeDetails {
        let app_id = current.app_id().to_string();

        // Read old and write new in one critical section
        let previous = self.cache.lock().insert(app_id, current.clone());

        let Some(previous) = previous else {
            trace!(app_id = %current.app_id(), "first sighting");
            return ChangeDetails::new(ChangeKind::None, "first sighting");
        };

        classify(old_node.unwrap_or(&previous.node), &current.node)
    }

    pub fn remember(
        &self,
        ctx: NodeContext,
    ) {
        self.cache.lock().insert(ctx.app_id().to_string(), ctx);
    }

    pub fn purge(
        &self,
        app_id: &str,
    ) -> Option<NodeContext> {
        self.cache.lock().remove(app_id)
    }

    pub fn snapshot(
        &self,
        app_id: &str,
    ) -> Option<NodeContext> {
        self.cache.lock().get(app_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
