use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::Result;

/// Spawns a named long-running task and logs how it ended
pub(crate) fn spawn_task<Fut>(
    name: &str,
    task: Fut,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        match task.await {
            Ok(()) => debug!("task {name} finished"),
            Err(e) => error!("task {name} stopped with error: {e}"),
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}

/// Waits for every handle; the first task that panicked or was aborted is
/// returned as the error once all of them are done
pub(crate) async fn join_tasks(handles: Vec<JoinHandle<()>>) -> Result<()> {
    let mut first_failure = None;
    for h in handles {
        if let Err(e) = h.await {
            warn!("task failed: {e}");
            first_failure.get_or_insert(e);
        }
    }
    match first_failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
