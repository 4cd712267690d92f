use serde::Deserialize;
use serde::Serialize;

use super::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub cidr: String,
    /// AppIds of the member nodes
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// A named group of mutually routable nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub meta: ObjectMeta,
    pub spec: NetworkSpec,
}

impl Network {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: NetworkSpec {
                cidr: cidr.into(),
                nodes: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn has_member(
        &self,
        app_id: &str,
    ) -> bool {
        self.spec.nodes.iter().any(|n| n == app_id)
    }

    /// Adds the member if absent. Returns whether the list changed.
    pub fn add_member(
        &mut self,
        app_id: &str,
    ) -> bool {
        if self.has_member(app_id) {
            return false;
        }
        self.spec.nodes.push(app_id.to_string());
        true
    }

    /// Removes the member if present. Returns whether the list changed.
    pub fn remove_member(
        &mut self,
        app_id: &str,
    ) -> bool {
        let before = self.spec.nodes.len();
        self.spec.nodes.retain(|n| n != app_id);
        before != self.spec.nodes.len()
    }
}
