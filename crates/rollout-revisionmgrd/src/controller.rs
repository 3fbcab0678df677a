//! Revision Controller - detects drift and publishes numbered snapshot sets

use std::sync::Arc;

use parking_lot::Mutex;
use rollout_common::informer::{spawn_object_informer, spawn_status_informer};
use rollout_common::{
    ChangeObserver, KeyEnqueuer, KindClient, ManagementState, ObjectStore, RateLimiterConfig,
    ResourceKind, StatusClient, WorkQueue,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::creator::create_revision;
use crate::divergence::is_latest_revision_current;
use crate::error::{ControllerError, ControllerResult};
use crate::events::{EventRecorder, TracingRecorder};
use crate::state::{SyncEvent, SyncState, SyncTrace};
use crate::status::{advance_revision_fn, clear_failing_fn, set_failing_fn, update_status};
use crate::types::{
    event_reasons, RevisionResource, TrackedResource, CONTENT_CREATION_ERROR, WORK_QUEUE_KEY,
};

/// Revision Controller
///
/// Watches a set of ConfigMaps and Secrets in one namespace and, whenever
/// any of them differs from the snapshots of the latest revision, writes a
/// new revision and advances `latest_available_revision`.
pub struct RevisionController {
    /// Target namespace for sources, snapshots and markers
    namespace: String,

    /// Tracked resources: ConfigMaps first, then Secrets
    tracked: Vec<TrackedResource>,

    /// Client for status markers
    markers: KindClient,

    store: Arc<dyn ObjectStore>,
    status: Arc<dyn StatusClient>,
    recorder: Arc<dyn EventRecorder>,

    /// Single-key work queue
    queue: WorkQueue<&'static str>,

    /// Trace of the most recent pass
    last_pass: Mutex<SyncTrace>,
}

impl RevisionController {
    /// Create a new RevisionController
    pub fn new(
        namespace: impl Into<String>,
        config_maps: Vec<RevisionResource>,
        secrets: Vec<RevisionResource>,
        store: Arc<dyn ObjectStore>,
        status: Arc<dyn StatusClient>,
    ) -> Self {
        let namespace = namespace.into();
        let bind = |kind: ResourceKind, descriptors: Vec<RevisionResource>| {
            let client = KindClient::new(Arc::clone(&store), kind, namespace.clone());
            descriptors
                .into_iter()
                .map(move |d| TrackedResource::new(d, client.clone()))
        };
        let tracked: Vec<_> = bind(ResourceKind::ConfigMap, config_maps)
            .chain(bind(ResourceKind::Secret, secrets))
            .collect();
        let markers = KindClient::new(Arc::clone(&store), ResourceKind::ConfigMap, namespace.clone());

        info!(
            namespace = %namespace,
            tracked = tracked.len(),
            "RevisionController initialized"
        );

        Self {
            namespace,
            tracked,
            markers,
            store,
            status,
            recorder: Arc::new(TracingRecorder),
            queue: WorkQueue::new(),
            last_pass: Mutex::new(SyncTrace::default()),
        }
    }

    /// Replace the event recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Replace the work queue backoff
    pub fn with_rate_limiter(mut self, limiter: RateLimiterConfig) -> Self {
        self.queue = WorkQueue::with_rate_limiter(limiter);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tracked resources in evaluation order
    pub fn tracked(&self) -> &[TrackedResource] {
        &self.tracked
    }

    pub fn queue(&self) -> &WorkQueue<&'static str> {
        &self.queue
    }

    /// State the most recent pass ended in
    pub fn last_state(&self) -> SyncState {
        self.last_pass.lock().state()
    }

    /// States visited by the most recent pass
    pub fn last_trace(&self) -> Vec<SyncState> {
        self.last_pass.lock().states().to_vec()
    }

    /// Run one reconciliation pass
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn sync(&self) -> ControllerResult<()> {
        let mut trace = SyncTrace::begin(self.last_state());
        let result = self.sync_pass(&mut trace).await;
        *self.last_pass.lock() = trace;
        result
    }

    async fn sync_pass(&self, trace: &mut SyncTrace) -> ControllerResult<()> {
        let snapshot = self.status.get().await?;
        if snapshot.spec.management_state != ManagementState::Managed {
            debug!(
                management_state = snapshot.spec.management_state.as_str(),
                "Not managed; skipping"
            );
            return Ok(());
        }

        let latest = snapshot.status.latest_available_revision;
        let (current, reason) = is_latest_revision_current(&self.tracked, latest).await?;
        if current {
            trace.advance(SyncEvent::Current)?;
            debug!(revision = latest, "Latest revision is current");
            return Ok(());
        }
        trace.advance(SyncEvent::Drifted)?;

        let next = latest
            .checked_add(1)
            .ok_or(ControllerError::RevisionOverflow { current: latest })?;
        info!(revision = next, reason = %reason, "New revision triggered");
        self.recorder.event(
            event_reasons::REVISION_TRIGGERED,
            format!("new revision {} triggered by {:?}", next, reason),
        );

        trace.advance(SyncEvent::Started)?;
        if let Err(err) = create_revision(&self.markers, &self.tracked, next).await {
            trace.advance(SyncEvent::CreationFailed)?;
            self.recorder.warning(
                event_reasons::REVISION_CREATE_FAILED,
                format!("Failed to create revision {}: {}", next, err),
            );
            update_status(
                self.status.as_ref(),
                &[set_failing_fn(CONTENT_CREATION_ERROR, err.to_string())],
            )
            .await?;
            return Err(ControllerError::requeue(err.to_string()));
        }
        trace.advance(SyncEvent::Created)?;

        match update_status(
            self.status.as_ref(),
            &[clear_failing_fn(), advance_revision_fn(next)],
        )
        .await
        {
            Ok((_, updated)) => {
                trace.advance(SyncEvent::Advanced)?;
                if updated {
                    info!(revision = next, "Latest available revision advanced");
                    self.recorder.event(
                        event_reasons::REVISION_CREATE,
                        format!("Revision {} created because {}", next, reason),
                    );
                }
                Ok(())
            }
            Err(e @ ControllerError::RevisionConflict { .. }) => {
                trace.advance(SyncEvent::LostRace)?;
                warn!(revision = next, error = %e, "Lost race advancing revision");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the controller until `cancel` fires.
    ///
    /// Only one worker ever runs; other counts are logged and ignored.
    pub async fn run(self: Arc<Self>, workers: usize, cancel: CancellationToken) {
        if workers != 1 {
            warn!(requested = workers, "RevisionController only supports one worker; using 1");
        }
        info!(namespace = %self.namespace, "Starting RevisionController");

        let observer: Arc<dyn ChangeObserver> =
            Arc::new(KeyEnqueuer::new(self.queue.clone(), WORK_QUEUE_KEY));

        let mut informers = Vec::new();
        for kind in self.tracked_kinds() {
            informers.push(spawn_object_informer(
                Arc::clone(&self.store),
                kind,
                self.namespace.clone(),
                Arc::clone(&observer),
                cancel.child_token(),
            ));
        }
        informers.push(spawn_status_informer(
            Arc::clone(&self.status),
            Arc::clone(&observer),
            cancel.child_token(),
        ));

        // Reconcile once on startup even if nothing changes
        self.queue.add(WORK_QUEUE_KEY);

        let worker = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { while this.process_next_work_item(&cancel).await {} })
        };

        cancel.cancelled().await;
        info!("Shutting down RevisionController");
        self.queue.shut_down();

        for handle in informers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Informer task failed");
            }
        }
        if let Err(e) = worker.await {
            error!(error = %e, "Worker task failed");
        }
        info!("RevisionController stopped");
    }

    /// Process one key; returns false once the queue is shut down.
    async fn process_next_work_item(&self, cancel: &CancellationToken) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ControllerError::Stopped),
            result = self.sync() => result,
        };

        let keep_going = match result {
            Ok(()) => {
                self.queue.forget(&key);
                true
            }
            Err(ControllerError::Stopped) => false,
            Err(e) => {
                error!(key, error = %e, "Sync failed; requeueing");
                self.queue.add_rate_limited(key);
                true
            }
        };

        self.queue.done(&key);
        keep_going
    }

    fn tracked_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::new();
        for resource in &self.tracked {
            if !kinds.contains(&resource.kind()) {
                kinds.push(resource.kind());
            }
        }
        kinds
    }
}
