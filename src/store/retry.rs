use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

use super::StoreClient;
use crate::Kind;
use crate::Node;
use crate::Resource;
use crate::Result;
use crate::StoreConfig;
use crate::StoreError;

/// Which part of the object a read-mutate-write cycle targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTarget {
    Object,
    Status,
}

/// Read → mutate → write, re-reading on conflict.
///
/// `mutate` returns `false` when the fresh object already has the desired
/// shape; the write is then skipped and the current object returned.
/// Non-conflict errors propagate immediately.
pub async fn update_with_retry<S, F>(
    store: &S,
    kind: Kind,
    namespace: &str,
    name: &str,
    retry: &StoreConfig,
    mutate: F,
) -> Result<Resource>
where
    S: StoreClient + ?Sized,
    F: FnMut(&mut Resource) -> bool,
{
    read_mutate_write(store, kind, namespace, name, retry, WriteTarget::Object, mutate).await
}

/// Same as [`update_with_retry`] but writes through `update_status`
pub async fn update_status_with_retry<S, F>(
    store: &S,
    kind: Kind,
    namespace: &str,
    name: &str,
    retry: &StoreConfig,
    mutate: F,
) -> Result<Resource>
where
    S: StoreClient + ?Sized,
    F: FnMut(&mut Resource) -> bool,
{
    read_mutate_write(store, kind, namespace, name, retry, WriteTarget::Status, mutate).await
}

/// Applies `mutate` to the node's status with conflict retry
pub async fn update_node_status<S, F>(
    store: &S,
    namespace: &str,
    app_id: &str,
    retry: &StoreConfig,
    mut mutate: F,
) -> Result<Node>
where
    S: StoreClient + ?Sized,
    F: FnMut(&mut Node) -> bool,
{
    let updated = update_status_with_retry(store, Kind::Node, namespace, app_id, retry, |r| match r {
        Resource::Node(n) => mutate(n),
        _ => false,
    })
    .await?;

    updated.into_node().ok_or_else(|| {
        StoreError::Backend(format!("object {app_id} returned for Node is not a Node")).into()
    })
}

async fn read_mutate_write<S, F>(
    store: &S,
    kind: Kind,
    namespace: &str,
    name: &str,
    retry: &StoreConfig,
    target: WriteTarget,
    mut mutate: F,
) -> Result<Resource>
where
    S: StoreClient + ?Sized,
    F: FnMut(&mut Resource) -> bool,
{
    let mut delay: Duration = retry.conflict_backoff();

    for attempt in 1..=retry.conflict_retries {
        let mut current = store.get(kind, namespace, name).await?;
        if !mutate(&mut current) {
            debug!(%kind, name, "object already up to date, skipping write");
            return Ok(current);
        }

        let written = match target {
            WriteTarget::Object => store.update(current).await,
            WriteTarget::Status => store.update_status(current).await,
        };

        match written {
            Ok(r) => return Ok(r),
            Err(e) if e.is_conflict() => {
                debug!(%kind, name, attempt, "write conflict, re-reading");
                if attempt < retry.conflict_retries {
                    sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }

    warn!(
        %kind,
        name,
        attempts = retry.conflict_retries,
        "giving up after repeated write conflicts"
    );
    Err(StoreError::ConflictRetriesExhausted {
        kind,
        name: name.to_string(),
        attempts: retry.conflict_retries,
    }
    .into())
}
