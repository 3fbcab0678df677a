//! Watch-driven change notifiers.
//!
//! An informer holds a watch open against the store and calls its
//! [`ChangeObserver`] once per event. When a watch ends or cannot be
//! opened it is re-established after a delay, and the observer is called
//! once more after every reconnect because events may have been missed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::object::ResourceKind;
use crate::queue::ChangeObserver;
use crate::store::{ObjectStore, StatusClient};

/// Delay before re-opening a watch that closed or failed.
pub const REWATCH_DELAY: Duration = Duration::from_secs(1);

/// Spawns an informer for one kind in one namespace.
pub fn spawn_object_informer(
    store: Arc<dyn ObjectStore>,
    kind: ResourceKind,
    namespace: String,
    observer: Arc<dyn ChangeObserver>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let name = format!("{}/{}", namespace, kind.plural());
    tokio::spawn(run_informer(
        name,
        move || {
            let store = Arc::clone(&store);
            let namespace = namespace.clone();
            async move { store.watch(kind, &namespace).await }
        },
        observer,
        cancel,
    ))
}

/// Spawns an informer for the status singleton.
pub fn spawn_status_informer(
    client: Arc<dyn StatusClient>,
    observer: Arc<dyn ChangeObserver>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_informer(
        "status".to_string(),
        move || {
            let client = Arc::clone(&client);
            async move { client.watch().await }
        },
        observer,
        cancel,
    ))
}

async fn run_informer<F, Fut, S>(
    name: String,
    connect: F,
    observer: Arc<dyn ChangeObserver>,
    cancel: CancellationToken,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = StoreResult<S>>,
    S: Stream + Unpin,
{
    let mut reconnecting = false;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = connect() => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(informer = %name, error = %e, "Failed to open watch");
                if wait_or_cancel(&cancel, REWATCH_DELAY).await {
                    break;
                }
                reconnecting = true;
                continue;
            }
        };

        if reconnecting {
            info!(informer = %name, "Watch re-established");
            observer.on_change();
        } else {
            debug!(informer = %name, "Watch started");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(informer = %name, "Informer stopped");
                    return;
                }
                item = stream.next() => match item {
                    Some(_) => observer.on_change(),
                    None => {
                        warn!(informer = %name, "Watch closed");
                        break;
                    }
                },
            }
        }

        if wait_or_cancel(&cancel, REWATCH_DELAY).await {
            break;
        }
        reconnecting = true;
    }

    debug!(informer = %name, "Informer stopped");
}

/// Sleeps for `delay`; returns true if cancelled first.
async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStatusClient, InMemoryStore};
    use crate::object::ObjectContent;
    use crate::queue::{KeyEnqueuer, WorkQueue};
    use crate::status::OperatorStatus;

    #[tokio::test]
    async fn test_object_informer_enqueues_on_change() {
        let store = Arc::new(InMemoryStore::new());
        let queue: WorkQueue<&str> = WorkQueue::new();
        let cancel = CancellationToken::new();

        let handle = spawn_object_informer(
            store.clone(),
            ResourceKind::ConfigMap,
            "ns".to_string(),
            Arc::new(KeyEnqueuer::new(queue.clone(), "key")),
            cancel.clone(),
        );

        // Give the informer a chance to subscribe
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .put(ResourceKind::ConfigMap, "ns", "app", ObjectContent::new())
            .await;

        let key = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(key, Some("key"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_informer_enqueues_on_change() {
        let client = Arc::new(InMemoryStatusClient::default());
        let queue: WorkQueue<&str> = WorkQueue::new();
        let cancel = CancellationToken::new();

        let handle = spawn_status_informer(
            client.clone(),
            Arc::new(KeyEnqueuer::new(queue.clone(), "key")),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.force_status(OperatorStatus::at_revision(1)).await;

        let key = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(key, Some("key"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
