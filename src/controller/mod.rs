//! Wires store, watcher, queue, reconciler and streams into one controller.
//!
//! ```ignore
//! let controller = ControllerBuilder::new(config, store, shutdown_rx).build();
//! let watch = controller.watch_handler();       // hand to the Watch transport
//! let keepalive = controller.keepalive_handler();
//! controller.run().await?;                      // until shutdown fires
//! ```

#[cfg(test)]
mod controller_test;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::error;
use tracing::info;

use crate::default_rate_limiter;
use crate::run_worker;
use crate::utils::async_task::join_tasks;
use crate::utils::async_task::spawn_task;
use crate::ChangeDetector;
use crate::ChangeWatcher;
use crate::ControllerConfig;
use crate::Delivery;
use crate::KeepaliveHandler;
use crate::LivenessTracker;
use crate::PushEngine;
use crate::Reconciler;
use crate::Result;
use crate::StoreClient;
use crate::StreamRegistry;
use crate::WatchHandler;
use crate::WorkItem;
use crate::WorkQueue;

pub struct ControllerBuilder {
    config: ControllerConfig,
    store: Arc<dyn StoreClient>,
    shutdown: watch::Receiver<()>,
}

impl ControllerBuilder {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn StoreClient>,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            store,
            shutdown,
        }
    }

    pub fn build(self) -> Controller {
        let Self {
            config,
            store,
            shutdown,
        } = self;

        let queue = Arc::new(WorkQueue::new(Box::new(default_rate_limiter(&config.queue))));
        let detector = Arc::new(ChangeDetector::new());
        let registry = Arc::new(StreamRegistry::new(&config.stream));
        let push = Arc::new(PushEngine::new(registry.clone()));
        let liveness = Arc::new(LivenessTracker::new(store.clone(), config.store.clone()));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            config.store.clone(),
            detector.clone(),
            push.clone(),
            queue.clone(),
        ));
        let watcher = Arc::new(ChangeWatcher::new(
            store,
            queue.clone(),
            detector.clone(),
            registry.clone(),
            liveness.clone(),
            config.watcher.clone(),
        ));

        Controller {
            config,
            queue,
            detector,
            registry,
            push,
            liveness,
            reconciler,
            watcher,
            shutdown,
        }
    }
}

pub struct Controller {
    config: ControllerConfig,
    queue: Arc<WorkQueue<WorkItem>>,
    detector: Arc<ChangeDetector>,
    registry: Arc<StreamRegistry>,
    push: Arc<PushEngine>,
    liveness: Arc<LivenessTracker>,
    reconciler: Arc<Reconciler>,
    watcher: Arc<ChangeWatcher>,
    shutdown: watch::Receiver<()>,
}

impl Controller {
    /// Runs the watcher and the worker pool until the shutdown signal fires
    /// or a store watch closes. Workers finish the item in hand before
    /// returning. A closed watch is returned as `StoreError::WatchClosed` and a
    /// task that panicked as `SystemError::TaskFailed`.
    pub async fn run(&self) -> Result<()> {
        let mut handles = Vec::new();

        let watcher = self.watcher.clone();
        let rx = self.shutdown.clone();
        let mut watch_task = tokio::spawn(async move { watcher.run(rx).await });

        for id in 0..self.config.queue.workers {
            let queue = self.queue.clone();
            let handler = self.reconciler.clone();
            spawn_task(
                &format!("worker-{id}"),
                async move {
                    run_worker(id, queue, handler).await;
                    Ok(())
                },
                Some(&mut handles),
            );
        }
        info!(workers = self.config.queue.workers, "controller running");

        let mut shutdown = self.shutdown.clone();
        let watch_result = tokio::select! {
            _ = shutdown.changed() => {
                info!("controller shutting down");
                watch_task.await
            }
            res = &mut watch_task => {
                error!("store watch stopped, controller shutting down");
                res
            }
        };
        self.queue.shut_down();

        join_tasks(handles).await?;
        watch_result??;
        info!("controller stopped");
        Ok(())
    }

    /// Handler for Watch streams opened by agents
    pub fn watch_handler(&self) -> WatchHandler {
        WatchHandler::new(
            self.registry.clone(),
            self.reconciler.clone(),
            self.liveness.clone(),
            self.config.stream.clone(),
        )
    }

    pub fn keepalive_handler(&self) -> KeepaliveHandler {
        KeepaliveHandler::new(self.liveness.clone(), self.config.stream.clone())
    }

    /// `Send(app_id, msg)` for other surfaces; fails when the node has no stream
    pub fn delivery(&self) -> Arc<dyn Delivery> {
        self.registry.clone()
    }

    pub fn registry(&self) -> Arc<StreamRegistry> {
        self.registry.clone()
    }

    pub fn queue(&self) -> Arc<WorkQueue<WorkItem>> {
        self.queue.clone()
    }

    pub fn push_engine(&self) -> Arc<PushEngine> {
        self.push.clone()
    }

    pub fn detector(&self) -> Arc<ChangeDetector> {
        self.detector.clone()
    }
}
