//! Declarative resources the controller watches.
//!
//! Nodes, Networks and Policies live in the external resource store. The
//! controller only ever holds copies of them: anything read from the store is
//! owned by the caller and may be mutated or cached freely.

mod meta;
mod network;
mod node;
mod policy;

pub use meta::*;
pub use network::*;
pub use node::*;
pub use policy::*;


use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Resource kinds known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Node,
    Network,
    Policy,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Node => "Node",
            Kind::Network => "Network",
            Kind::Policy => "Policy",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any resource held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    Node(Node),
    Network(Network),
    Policy(Policy),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Resource::Node(_) => Kind::Node,
            Resource::Network(_) => Kind::Network,
            Resource::Policy(_) => Kind::Policy,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Resource::Node(n) => &n.meta,
            Resource::Network(n) => &n.meta,
            Resource::Policy(p) => &p.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Resource::Node(n) => &mut n.meta,
            Resource::Network(n) => &mut n.meta,
            Resource::Policy(p) => &mut p.meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    /// Value of a field addressable by a field selector.
    ///
    /// Supported paths: `metadata.name`, `metadata.namespace`,
    /// `spec.network` (Policy) and `status.phase` (Node).
    pub fn field(
        &self,
        path: &str,
    ) -> Option<String> {
        match path {
            "metadata.name" => Some(self.meta().name.clone()),
            "metadata.namespace" => Some(self.meta().namespace.clone()),
            "spec.network" => match self {
                Resource::Policy(p) => Some(p.spec.network.clone()),
                _ => None,
            },
            "status.phase" => match self {
                Resource::Node(n) => Some(n.status.phase.as_str().to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Resource::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            Resource::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_network(self) -> Option<Network> {
        match self {
            Resource::Network(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_policy(self) -> Option<Policy> {
        match self {
            Resource::Policy(p) => Some(p),
            _ => None,
        }
    }
}

impl From<Node> for Resource {
    fn from(n: Node) -> Self {
        Resource::Node(n)
    }
}

impl From<Network> for Resource {
    fn from(n: Network) -> Self {
        Resource::Network(n)
    }
}

impl From<Policy> for Resource {
    fn from(p: Policy) -> Self {
        Resource::Policy(p)
    }
}
