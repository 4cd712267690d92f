use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::first_request;
use super::is_terminal;
use super::AgentStream;
use super::LivenessTracker;
use super::StreamLifecycle;
use super::StreamRegistry;
use crate::metrics::OPEN_STREAMS;
use crate::Message;
use crate::StreamConfig;
use crate::StreamError;
use crate::WatchRequest;

/// Serves Watch streams: registers the node, forwards its messages until the
/// stream ends, then cleans up.
///
/// # Lifecycle
///
/// 1. First request names the node; an empty AppId is rejected before anything
///    is registered
/// 2. Register a session and push the initial snapshot
/// 3. Forward queued messages until the client cancels, the inbound side
///    fails or the session is replaced. A client that half-closes after the
///    first request keeps receiving.
/// 4. Drop the session; after the grace window, if no newer session opened
///    and closed in the meantime and the node has not come back, mark it
///    Inactive and tell its peers
pub struct WatchHandler {
    registry: Arc<StreamRegistry>,
    lifecycle: Arc<dyn StreamLifecycle>,
    liveness: Arc<LivenessTracker>,
    /// AppId -> session whose grace timer currently owns the disconnect
    closing: Arc<DashMap<String, u64>>,
    config: StreamConfig,
}

impl WatchHandler {
    pub fn new(
        registry: Arc<StreamRegistry>,
        lifecycle: Arc<dyn StreamLifecycle>,
        liveness: Arc<LivenessTracker>,
        config: StreamConfig,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            liveness,
            closing: Arc::new(DashMap::new()),
            config,
        }
    }

    pub async fn handle(
        &self,
        stream: AgentStream<WatchRequest, Message>,
    ) -> Result<(), Status> {
        let AgentStream {
            mut inbound,
            outbound,
            cancel,
        } = stream;

        let req = first_request(&mut inbound, self.config.first_request_timeout()).await?;
        let app_id = req.app_id.trim().to_string();
        if app_id.is_empty() {
            return Err(StreamError::InvalidRequest("app_id must not be empty".into()).into());
        }

        let mut registration = self.registry.register(&app_id);
        let session = registration.session_id;

        if let Err(e) = self.lifecycle.on_open(&app_id).await {
            warn!(%app_id, "initial sync failed: {e}");
            if self.registry.deregister_session(&app_id, session) {
                self.lifecycle.on_close(&app_id).await;
            }
            return Err(e.into());
        }

        info!(%app_id, session, "watch stream opened");
        OPEN_STREAMS.with_label_values(&["watch"]).inc();

        let mut inbound_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%app_id, "watch stream cancelled by client");
                    break;
                }
                msg = registration.receiver.recv() => {
                    let Some(msg) = msg else {
                        debug!(%app_id, session, "session replaced or removed");
                        break;
                    };
                    let event = msg.event_type;
                    match outbound.send(msg).await {
                        Ok(()) => debug!(%app_id, ?event, "message sent"),
                        Err(status) if is_terminal(status.code()) => {
                            info!(%app_id, "watch stream lost: {}", status.message());
                            break;
                        }
                        Err(status) => {
                            warn!(%app_id, ?event, "transient send error: {}", status.message());
                        }
                    }
                }
                req = inbound.next(), if inbound_open => match req {
                    Some(Ok(_)) => debug!(%app_id, "ignoring extra watch request"),
                    Some(Err(status)) => {
                        debug!(%app_id, "inbound error: {}", status.message());
                        break;
                    }
                    None => {
                        debug!(%app_id, "client closed its request side, still streaming");
                        inbound_open = false;
                    }
                },
            }
        }

        OPEN_STREAMS.with_label_values(&["watch"]).dec();
        self.close(&app_id, session).await;
        Ok(())
    }

    async fn close(
        &self,
        app_id: &str,
        session: u64,
    ) {
        if !self.registry.deregister_session(app_id, session) {
            // A newer session owns the node now
            debug!(%app_id, session, "watch stream closed after being replaced");
            return;
        }

        info!(%app_id, session, "watch stream closed");
        self.lifecycle.on_close(app_id).await;

        self.closing.insert(app_id.to_string(), session);
        let closing = self.closing.clone();
        let registry = self.registry.clone();
        let lifecycle = self.lifecycle.clone();
        let liveness = self.liveness.clone();
        let grace = self.config.disconnect_grace();
        let app_id = app_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if registry.is_registered(&app_id) {
                debug!(%app_id, "node reconnected within grace window");
                return;
            }
            if closing.remove_if(&app_id, |_, s| *s == session).is_none() {
                // A later session closed too; its own timer decides
                debug!(%app_id, session, "grace timer superseded");
                return;
            }

            match liveness.mark_inactive(&app_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return,
                Err(e) => warn!(%app_id, "could not mark node inactive: {e}"),
            }
            if let Err(e) = lifecycle.on_disconnect(&app_id).await {
                warn!(%app_id, "peer removal after disconnect failed: {e}");
            }
        });
    }
}
