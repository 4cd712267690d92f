use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::ObjectMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PolicyAction {
    #[default]
    Allow,
    Deny,
}

/// Traffic rule matching peers by label
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub peer_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Owning network
    pub network: String,
    /// Label match selecting the nodes the policy applies to
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub ingress: Vec<Rule>,
    #[serde(default)]
    pub egress: Vec<Rule>,
    #[serde(default)]
    pub action: PolicyAction,
}

/// An access-control rule scoped to a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub meta: ObjectMeta,
    pub spec: PolicySpec,
}

impl Policy {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: PolicySpec {
                network: network.into(),
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}
