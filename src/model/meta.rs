use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

/// Metadata common to every stored resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Opaque version assigned by the store on every write. Empty until the
    /// object has been persisted.
    #[serde(default)]
    pub resource_version: String,
    /// Set by the store on create
    pub creation_timestamp: Option<SystemTime>,
}

impl ObjectMeta {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            resource_version: String::new(),
            creation_timestamp: None,
        }
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Label and field constraints used by `List`.
///
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub labels: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn field(
        mut self,
        path: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    pub fn matches_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn matches(
        &self,
        resource: &super::Resource,
    ) -> bool {
        self.matches_labels(&resource.meta().labels)
            && self
                .fields
                .iter()
                .all(|(path, v)| resource.field(path).as_deref() == Some(v.as_str()))
    }
}
