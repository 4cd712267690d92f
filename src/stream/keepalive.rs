use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::first_request;
use super::is_terminal;
use super::AgentStream;
use super::LivenessTracker;
use super::RequestStream;
use super::StreamSink;
use crate::metrics::KEEPALIVE_TIMEOUTS_TOTAL;
use crate::metrics::OPEN_STREAMS;
use crate::KeepaliveProbe;
use crate::KeepaliveRequest;
use crate::StreamConfig;
use crate::StreamError;

/// Probes a node at a fixed interval and tracks whether it answers.
///
/// A timely answer marks the node Active. A missed answer or a broken
/// inbound side marks it Inactive and ends the stream with an error, so the
/// agent sees the termination and reconnects.
pub struct KeepaliveHandler {
    liveness: Arc<LivenessTracker>,
    config: StreamConfig,
}

impl KeepaliveHandler {
    pub fn new(
        liveness: Arc<LivenessTracker>,
        config: StreamConfig,
    ) -> Self {
        Self { liveness, config }
    }

    pub async fn handle(
        &self,
        stream: AgentStream<KeepaliveRequest, KeepaliveProbe>,
    ) -> Result<(), Status> {
        let AgentStream {
            mut inbound,
            outbound,
            cancel,
        } = stream;

        let req = first_request(&mut inbound, self.config.first_request_timeout()).await?;
        let app_id = req.app_id.trim().to_string();
        if app_id.is_empty() || req.pub_key.is_empty() {
            return Err(StreamError::InvalidRequest("app_id and pub_key are required".into()).into());
        }

        info!(%app_id, "keepalive stream opened");
        OPEN_STREAMS.with_label_values(&["keepalive"]).inc();
        let result = self
            .probe_loop(&app_id, &req.pub_key, &mut inbound, outbound.as_ref(), &cancel)
            .await;
        OPEN_STREAMS.with_label_values(&["keepalive"]).dec();
        result
    }

    async fn probe_loop(
        &self,
        app_id: &str,
        pub_key: &str,
        inbound: &mut RequestStream<KeepaliveRequest>,
        outbound: &dyn StreamSink<KeepaliveProbe>,
        cancel: &CancellationToken,
    ) -> Result<(), Status> {
        let interval = self.config.keepalive_interval();
        let wait = self.config.keepalive_timeout();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%app_id, "keepalive stream cancelled by client");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let probe = KeepaliveProbe {
                pub_key: pub_key.to_string(),
            };
            if let Err(status) = outbound.send(probe).await {
                if is_terminal(status.code()) {
                    self.mark_inactive(app_id).await;
                    return Err(status);
                }
                warn!(%app_id, "transient probe send error: {}", status.message());
                continue;
            }

            let answer = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%app_id, "keepalive stream cancelled by client");
                    return Ok(());
                }
                answer = tokio::time::timeout(wait, inbound.next()) => answer,
            };

            match answer {
                Ok(Some(Ok(resp))) => {
                    if resp.pub_key != pub_key {
                        warn!(%app_id, "keepalive answered with a different public key");
                    }
                    if let Err(e) = self.liveness.mark_active(app_id).await {
                        warn!(%app_id, "could not mark node active: {e}");
                    }
                }
                Ok(Some(Err(status))) => {
                    warn!(%app_id, "keepalive receive failed: {}", status.message());
                    self.mark_inactive(app_id).await;
                    return Err(status);
                }
                Ok(None) => {
                    info!(%app_id, "keepalive stream closed by client");
                    self.mark_inactive(app_id).await;
                    return Err(Status::unavailable("keepalive stream closed"));
                }
                Err(_) => {
                    warn!(%app_id, timeout = ?wait, "keepalive probe unanswered");
                    KEEPALIVE_TIMEOUTS_TOTAL.inc();
                    self.mark_inactive(app_id).await;
                    return Err(StreamError::KeepaliveTimeout {
                        app_id: app_id.to_string(),
                        duration: wait,
                    }
                    .into());
                }
            }
        }
    }

    async fn mark_inactive(
        &self,
        app_id: &str,
    ) {
        if let Err(e) = self.liveness.mark_inactive(app_id).await {
            warn!(%app_id, "could not mark node inactive: {e}");
        }
    }
}
