//! Prometheus metrics for the coordination plane, served on `/metrics`.


use std::net::SocketAddr;
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref RECONCILE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reconcile_total", "Processed work items by kind and outcome"),
        &["kind", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref REQUEUES_TOTAL: IntCounter =
        IntCounter::new("requeues_total", "Work items requeued after a failure")
            .expect("metric can not be created");

    pub static ref PUSHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pushes_total", "Push attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref KEEPALIVE_TIMEOUTS_TOTAL: IntCounter =
        IntCounter::new("keepalive_timeouts_total", "Keepalive probes left unanswered")
            .expect("metric can not be created");

    pub static ref OPEN_STREAMS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("open_streams", "Agent streams currently open"),
        &["stream"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RECONCILE_TOTAL.clone()),
        Box::new(REQUEUES_TOTAL.clone()),
        Box::new(PUSHES_TOTAL.clone()),
        Box::new(KEEPALIVE_TIMEOUTS_TOTAL.clone()),
        Box::new(OPEN_STREAMS.clone()),
    ];
    for c in collectors {
        if let Err(e) = registry.register(c) {
            error!("collector can not be registered: {e}");
        }
    }
}

/// Text exposition of every registered metric
pub fn gather_metrics() -> String {
    use prometheus::Encoder;

    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {e}");
        String::default()
    })
}

/// Serves `/metrics` until `shutdown_signal` fires
pub async fn start_server(
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(%addr, "metrics server listening");
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics())
}
