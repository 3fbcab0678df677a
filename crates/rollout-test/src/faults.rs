//! Fault-injecting and instrumented client wrappers

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollout_common::{
    InMemoryStatusClient, ObjectStore, OperatorStatus, ResourceKind, StatusClient,
    StatusSnapshot, StatusWatchStream, StoreError, StoreResult, StoredObject, VersionToken,
    WatchStream,
};
use tracing::debug;

type CompetingWrite = Box<dyn Fn(&mut OperatorStatus) + Send + Sync>;

/// Status client that lets a competing writer win the next `conflicts`
/// writes.
///
/// Just before each of those writes the competing mutation is applied
/// directly to the inner client, which moves its version on, so the
/// caller's token is stale and the write fails with a conflict.
pub struct ConflictingStatusClient {
    inner: Arc<InMemoryStatusClient>,
    remaining: AtomicU32,
    injected: AtomicU32,
    competing_write: CompetingWrite,
}

impl ConflictingStatusClient {
    /// Wrap `inner`; the competing writer changes nothing but the version
    pub fn new(inner: Arc<InMemoryStatusClient>, conflicts: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(conflicts),
            injected: AtomicU32::new(0),
            competing_write: Box::new(|_| {}),
        }
    }

    /// Set what the competing writer does to the status
    pub fn with_competing_write<F>(mut self, write: F) -> Self
    where
        F: Fn(&mut OperatorStatus) + Send + Sync + 'static,
    {
        self.competing_write = Box::new(write);
        self
    }

    /// Number of conflicts injected so far
    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StatusClient for ConflictingStatusClient {
    async fn get(&self) -> StoreResult<StatusSnapshot> {
        self.inner.get().await
    }

    async fn update_status(
        &self,
        version: &VersionToken,
        status: OperatorStatus,
    ) -> StoreResult<VersionToken> {
        if self.take_conflict() {
            let mut competing = self.inner.status().await;
            (self.competing_write)(&mut competing);
            self.inner.force_status(competing).await;
            self.injected.fetch_add(1, Ordering::SeqCst);
            debug!(version = %version, "Injected competing status write");
        }
        self.inner.update_status(version, status).await
    }

    async fn watch(&self) -> StoreResult<StatusWatchStream> {
        self.inner.watch().await
    }
}

/// Object store whose next `failures` reads fail with a transport error
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    remaining: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ObjectStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
        }
    }

    /// Make the next `failures` reads fail
    pub fn fail_next(&self, failures: u32) {
        self.remaining.store(failures, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StoredObject> {
        if self.take_failure() {
            return Err(StoreError::transport("get", "connection reset by peer"));
        }
        self.inner.get(kind, namespace, name).await
    }

    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.inner.create(object).await
    }

    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.inner.update(object).await
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<StoredObject>> {
        self.inner.list(kind, namespace).await
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> StoreResult<WatchStream> {
        self.inner.watch(kind, namespace).await
    }
}

/// Object store that records how many reads are in flight at once.
///
/// Each `get` holds its slot for `delay` so that overlapping passes are
/// observable.
pub struct ConcurrencyTrackingStore {
    inner: Arc<dyn ObjectStore>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ConcurrencyTrackingStore {
    pub fn new(inner: Arc<dyn ObjectStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Highest number of concurrent reads seen so far
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ConcurrencyTrackingStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StoredObject> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.get(kind, namespace, name).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.inner.create(object).await
    }

    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.inner.update(object).await
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<StoredObject>> {
        self.inner.list(kind, namespace).await
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> StoreResult<WatchStream> {
        self.inner.watch(kind, namespace).await
    }
}
