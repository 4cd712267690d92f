use std::sync::Arc;

use meshsync::metrics;
use meshsync::ControllerBuilder;
use meshsync::ControllerConfig;
use meshsync::Error;
use meshsync::MemoryStore;
use meshsync::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let config = ControllerConfig::new()?.validate()?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if config.monitoring.prometheus_enabled {
        let addr = config.monitoring.listen_addr();
        let rx = graceful_rx.clone();
        tokio::spawn(async move { metrics::start_server(addr, rx).await });
    }

    // Embedded mode: the controller owns an in-process store
    let store = Arc::new(MemoryStore::new());
    let controller = ControllerBuilder::new(config, store, graceful_rx).build();

    info!("Controller started. Waiting for CTRL+C signal...");
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = controller.run().await {
        error!("controller stops: {:?}", e);
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(signal_error)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(signal_error)?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx
        .send(())
        .map_err(|e| Error::Fatal(format!("Failed to send shutdown signal: {e}")))?;

    info!("Shutdown signal sent");
    Ok(())
}

fn signal_error(e: std::io::Error) -> Error {
    Error::Fatal(format!("cannot install signal handler: {e}"))
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry().with(base_subscriber).init();
}
