use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use super::WorkQueue;
use crate::metrics::REQUEUES_TOTAL;
use crate::Result;

/// Processes one queued item. An error sends the item back with backoff.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    async fn handle(
        &self,
        item: &T,
    ) -> Result<()>;
}

/// Drains `queue` until it shuts down.
///
/// Success clears the item's backoff; failure requeues it rate limited.
/// Either way the item is marked done, so a concurrent re-add is picked up.
pub async fn run_worker<T, H>(
    id: usize,
    queue: Arc<WorkQueue<T>>,
    handler: Arc<H>,
) where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    H: Handler<T> + ?Sized,
{
    debug!(worker = id, "worker started");

    while let Some(item) = queue.get().await {
        match handler.handle(&item).await {
            Ok(()) => queue.forget(&item),
            Err(e) => {
                warn!(
                    worker = id,
                    ?item,
                    requeues = queue.num_requeues(&item),
                    "reconcile failed, requeueing: {e}"
                );
                REQUEUES_TOTAL.inc();
                queue.add_rate_limited(item.clone());
            }
        }
        queue.done(&item);
    }

    debug!(worker = id, "worker stopped");
}
