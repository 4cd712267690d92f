//! Controller Error Hierarchy
//!
//! Errors are grouped by the layer that raises them: the resource store,
//! delivery to connected agents, the agent-facing streams and the process
//! itself.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::Kind;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (serialization, background tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Declarative resource store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message delivery to a connected agent failed
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Agent stream protocol failures
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: Kind, name: String },

    /// Optimistic concurrency check failed: the object changed since it was read
    #[error("Conflict updating {kind} {name}: object has been modified")]
    Conflict { kind: Kind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: Kind, name: String },

    #[error("Gave up updating {kind} {name} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted {
        kind: Kind,
        name: String,
        attempts: usize,
    },

    #[error("Watch stream for {0} closed")]
    WatchClosed(Kind),

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// No Watch stream is registered for the node
    #[error("Node {0} has no open delivery channel")]
    NotConnected(String),

    /// The stream handler went away between lookup and send
    #[error("Delivery channel for node {0} is closed")]
    ChannelClosed(String),

    #[error("Delivery to node {app_id} timed out after {duration:?}")]
    Timeout { app_id: String, duration: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Malformed or incomplete request from an agent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No initial request received within {0:?}")]
    FirstRequestTimeout(Duration),

    #[error("Node {app_id} did not answer keepalive within {duration:?}")]
    KeepaliveTimeout { app_id: String, duration: Duration },

    #[error("Stream closed by peer")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl Error {
    /// True when the store rejected a write because of a stale resource version
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::Conflict { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound { .. }))
    }
}

// ============== Conversion Implementations ============== //
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(e))
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        match e {
            Error::Stream(StreamError::InvalidRequest(msg)) => tonic::Status::invalid_argument(msg),
            Error::Stream(StreamError::FirstRequestTimeout(d)) => {
                tonic::Status::deadline_exceeded(format!("no initial request within {d:?}"))
            }
            Error::Stream(e @ StreamError::KeepaliveTimeout { .. }) => {
                tonic::Status::deadline_exceeded(e.to_string())
            }
            Error::Stream(StreamError::Closed) => tonic::Status::cancelled("stream closed"),
            Error::Delivery(e) => tonic::Status::unavailable(e.to_string()),
            Error::Store(e @ StoreError::NotFound { .. }) => tonic::Status::not_found(e.to_string()),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

impl From<StreamError> for tonic::Status {
    fn from(e: StreamError) -> Self {
        Error::from(e).into()
    }
}
