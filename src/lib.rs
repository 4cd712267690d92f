//! Coordination plane of a mesh overlay network.
//!
//! Keeps every connected agent's view of its network (peers, addresses,
//! keys, policies) eventually consistent with the declarative resource store:
//!
//! ```text
//! store watch ─► ChangeWatcher ─► WorkQueue ─► Reconciler ─► PushEngine ─► StreamRegistry ─► agent
//!                                                                 ▲
//!                       agent ◄─► KeepaliveHandler ─► LivenessTracker ─► store status
//! ```

mod config;
mod controller;
mod errors;
mod model;
mod push;
mod queue;
mod reconcile;
mod store;
mod stream;
mod watcher;
mod wire;

pub mod metrics;
pub mod utils;

pub use config::*;
pub use controller::*;
pub use errors::*;
pub use model::*;
pub use push::*;
pub use queue::*;
pub use reconcile::*;
pub use store::*;
pub use stream::*;
pub use watcher::*;
pub use wire::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
