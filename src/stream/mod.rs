//! Long-lived agent streams: Watch (config delivery) and Keepalive (liveness).
//!
//! The transport is abstract. A handler sees an [`AgentStream`]: the inbound
//! request stream, an outbound [`StreamSink`] and a cancellation token the
//! transport fires when the client goes away.
//!
//! ```text
//!              ┌──────────────── StreamRegistry ───────────────┐
//! PushEngine ─►│ app_id → (session, mpsc::Sender<Message>)     │─► WatchHandler ─► agent
//!              └───────────────────────────────────────────────┘
//! KeepaliveHandler ◄──── probe / response ────► agent
//!        │
//!        └─► LivenessTracker ─► store (Active / Inactive)
//! ```

mod keepalive;
mod liveness;
mod registry;
mod watch_handler;

pub use keepalive::*;
pub use liveness::*;
pub use registry::*;
pub use watch_handler::*;


use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tonic::Code;
use tonic::Status;

use crate::Result;
use crate::StreamError;

pub type RequestStream<T> = BoxStream<'static, std::result::Result<T, Status>>;

/// Outbound half of an agent stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamSink<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    async fn send(
        &self,
        item: T,
    ) -> std::result::Result<(), Status>;
}

#[async_trait]
impl<T> StreamSink<T> for mpsc::Sender<std::result::Result<T, Status>>
where
    T: Send + Sync + 'static,
{
    async fn send(
        &self,
        item: T,
    ) -> std::result::Result<(), Status> {
        mpsc::Sender::send(self, Ok(item))
            .await
            .map_err(|_| Status::cancelled("client disconnected"))
    }
}

/// One bidirectional agent stream as seen by a handler
pub struct AgentStream<Req, Resp> {
    pub inbound: RequestStream<Req>,
    pub outbound: Box<dyn StreamSink<Resp>>,
    pub cancel: CancellationToken,
}

/// The agent's side of a channel-backed [`AgentStream`]
pub struct AgentEnd<Req, Resp> {
    pub requests: mpsc::Sender<std::result::Result<Req, Status>>,
    pub responses: mpsc::Receiver<std::result::Result<Resp, Status>>,
    pub cancel: CancellationToken,
}

impl<Req, Resp> AgentStream<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + Sync + 'static,
{
    /// Pairs a handler-side stream with the agent side, both over bounded
    /// channels, the way a tonic server-streaming handler is wired
    pub fn channel(capacity: usize) -> (Self, AgentEnd<Req, Resp>) {
        let (req_tx, req_rx) = mpsc::channel(capacity);
        let (resp_tx, resp_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();

        let stream = Self {
            inbound: ReceiverStream::new(req_rx).boxed(),
            outbound: Box::new(resp_tx),
            cancel: cancel.clone(),
        };
        let end = AgentEnd {
            requests: req_tx,
            responses: resp_rx,
            cancel,
        };
        (stream, end)
    }
}

/// Callbacks the Watch handler drives over a stream's lifetime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamLifecycle: Send + Sync + 'static {
    /// Stream registered; push the initial snapshot
    async fn on_open(
        &self,
        app_id: &str,
    ) -> Result<()>;

    /// The node's own session ended
    async fn on_close(
        &self,
        app_id: &str,
    );

    /// No new session showed up within the grace window
    async fn on_disconnect(
        &self,
        app_id: &str,
    ) -> Result<()>;
}

/// Send errors after which the stream cannot recover
pub fn is_terminal(code: Code) -> bool {
    matches!(code, Code::Cancelled | Code::Unavailable)
}

/// Waits for the identifying first request
pub(crate) async fn first_request<T>(
    inbound: &mut RequestStream<T>,
    within: Duration,
) -> std::result::Result<T, Status> {
    match tokio::time::timeout(within, inbound.next()).await {
        Ok(Some(Ok(req))) => Ok(req),
        Ok(Some(Err(status))) => Err(status),
        Ok(None) => Err(StreamError::Closed.into()),
        Err(_) => Err(StreamError::FirstRequestTimeout(within).into()),
    }
}
