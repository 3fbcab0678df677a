//! In-process store and status client.
//!
//! Both keep the same contracts as the networked backends (version tokens,
//! not-found and already-exists classification, watches) and count every
//! successful write so callers can assert that a pass wrote nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{future, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectContent, ResourceKind, StoredObject, WatchEvent, WatchEventType};
use crate::status::{
    ManagementState, OperatorSpec, OperatorStatus, StatusSnapshot, VersionToken,
};
use crate::store::{ObjectStore, StatusClient, StatusWatchStream, WatchStream};

/// Capacity of the watch fan-out channels.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

type ObjectKey = (ResourceKind, String, String);

fn object_key(kind: ResourceKind, namespace: &str, name: &str) -> ObjectKey {
    (kind, namespace.to_string(), name.to_string())
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<ObjectKey, StoredObject>,
    last_version: u64,
    last_uid: u64,
}

impl StoreState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

/// Object store held entirely in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    events: broadcast::Sender<WatchEvent>,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(StoreState::default()),
            events,
            writes: AtomicU64::new(0),
        }
    }

    /// Returns the number of successful creates, updates and deletes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Creates or overwrites an object regardless of its version, the way an
    /// external actor editing configuration would.
    pub async fn put(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        content: ObjectContent,
    ) -> StoredObject {
        let mut state = self.state.lock().await;
        let key = object_key(kind, namespace, name);
        let version = state.next_version();

        let (event_type, object) = match state.objects.get(&key) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.content = content;
                updated.meta.resource_version = version;
                (WatchEventType::Modified, updated)
            }
            None => {
                state.last_uid += 1;
                let mut created = StoredObject::new(kind, namespace, name, content);
                created.meta.uid = format!("uid-{}", state.last_uid);
                created.meta.resource_version = version;
                (WatchEventType::Added, created)
            }
        };

        state.objects.insert(key, object.clone());
        drop(state);

        self.record_write(event_type, &object);
        object
    }

    /// Deletes an object and, transitively, every object that names it as
    /// an owner. Returns the deleted objects, owner first.
    pub async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<Vec<StoredObject>> {
        let mut state = self.state.lock().await;
        let root = state
            .objects
            .remove(&object_key(kind, namespace, name))
            .ok_or_else(|| StoreError::not_found(kind, name))?;

        let mut deleted = vec![root];
        let mut cursor = 0;
        while cursor < deleted.len() {
            let owner_uid = deleted[cursor].meta.uid.clone();
            let dependents: Vec<ObjectKey> = state
                .objects
                .iter()
                .filter(|(_, obj)| {
                    obj.meta
                        .owner_references
                        .iter()
                        .any(|r| r.uid == owner_uid)
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in dependents {
                if let Some(obj) = state.objects.remove(&key) {
                    deleted.push(obj);
                }
            }
            cursor += 1;
        }
        drop(state);

        for obj in &deleted {
            self.record_write(WatchEventType::Deleted, obj);
        }
        debug!(
            kind = %kind,
            name,
            cascaded = deleted.len() - 1,
            "Deleted object"
        );
        Ok(deleted)
    }

    /// Returns the stored object, if any, without counting as a read.
    pub async fn snapshot(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Option<StoredObject> {
        self.state
            .lock()
            .await
            .objects
            .get(&object_key(kind, namespace, name))
            .cloned()
    }

    /// Returns the names of every object of a kind in a namespace.
    pub async fn names(&self, kind: ResourceKind, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .values()
            .filter(|obj| obj.kind == kind && obj.meta.namespace == namespace)
            .map(|obj| obj.meta.name.clone())
            .collect()
    }

    fn record_write(&self, event_type: WatchEventType, object: &StoredObject) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(WatchEvent::new(event_type, object.clone()));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StoredObject> {
        self.snapshot(kind, namespace, name)
            .await
            .ok_or_else(|| StoreError::not_found(kind, name))
    }

    async fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        let mut state = self.state.lock().await;
        let key = object_key(object.kind, &object.meta.namespace, &object.meta.name);
        if state.objects.contains_key(&key) {
            return Err(StoreError::already_exists(object.kind, object.meta.name));
        }

        state.last_uid += 1;
        object.meta.uid = format!("uid-{}", state.last_uid);
        object.meta.resource_version = state.next_version();
        state.objects.insert(key, object.clone());
        drop(state);

        self.record_write(WatchEventType::Added, &object);
        Ok(object)
    }

    async fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        let mut state = self.state.lock().await;
        let key = object_key(object.kind, &object.meta.namespace, &object.meta.name);
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(object.kind, object.meta.name.clone()))?;

        if current.meta.resource_version != object.meta.resource_version {
            return Err(StoreError::object_conflict(
                object.kind,
                &object.meta.name,
                format!(
                    "the object has been modified; stored version {}, presented {}",
                    current.meta.resource_version, object.meta.resource_version
                ),
            ));
        }

        object.meta.uid = current.meta.uid.clone();
        object.meta.resource_version = state.next_version();
        state.objects.insert(key, object.clone());
        drop(state);

        self.record_write(WatchEventType::Modified, &object);
        Ok(object)
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<StoredObject>> {
        Ok(self
            .state
            .lock()
            .await
            .objects
            .values()
            .filter(|obj| obj.kind == kind && obj.meta.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> StoreResult<WatchStream> {
        let namespace = namespace.to_string();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok(event) if event.object.kind == kind && event.object.meta.namespace == namespace => {
                    Some(event)
                }
                Ok(_) => None,
                Err(lagged) => {
                    warn!(kind = %kind, error = %lagged, "Watch fell behind; events dropped");
                    None
                }
            };
            future::ready(event)
        });
        Ok(stream.boxed())
    }
}

#[derive(Debug)]
struct StatusState {
    spec: OperatorSpec,
    status: OperatorStatus,
    version: u64,
}

/// Status singleton held in memory.
#[derive(Debug)]
pub struct InMemoryStatusClient {
    state: Mutex<StatusState>,
    events: broadcast::Sender<VersionToken>,
    updates: AtomicU64,
}

impl InMemoryStatusClient {
    /// Creates a managed operator with the given status.
    pub fn new(status: OperatorStatus) -> Self {
        Self::with_spec(OperatorSpec::default(), status)
    }

    /// Creates an operator with an explicit spec.
    pub fn with_spec(spec: OperatorSpec, status: OperatorStatus) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(StatusState {
                spec,
                status,
                version: 1,
            }),
            events,
            updates: AtomicU64::new(0),
        }
    }

    /// Returns the current status.
    pub async fn status(&self) -> OperatorStatus {
        self.state.lock().await.status.clone()
    }

    /// Returns the current version token.
    pub async fn version(&self) -> VersionToken {
        VersionToken::new(self.state.lock().await.version.to_string())
    }

    /// Returns the number of successful `update_status` calls.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Changes the management state, bumping the version.
    pub async fn set_management_state(&self, management_state: ManagementState) {
        let mut state = self.state.lock().await;
        state.spec.management_state = management_state;
        state.version += 1;
        let token = VersionToken::new(state.version.to_string());
        drop(state);
        let _ = self.events.send(token);
    }

    /// Overwrites the status without a version check, the way a competing
    /// writer would. Not counted in [`update_count`](Self::update_count).
    pub async fn force_status(&self, status: OperatorStatus) -> VersionToken {
        let mut state = self.state.lock().await;
        state.status = status;
        state.version += 1;
        let token = VersionToken::new(state.version.to_string());
        drop(state);
        let _ = self.events.send(token.clone());
        token
    }
}

impl Default for InMemoryStatusClient {
    fn default() -> Self {
        Self::new(OperatorStatus::default())
    }
}

#[async_trait]
impl StatusClient for InMemoryStatusClient {
    async fn get(&self) -> StoreResult<StatusSnapshot> {
        let state = self.state.lock().await;
        Ok(StatusSnapshot {
            spec: state.spec.clone(),
            status: state.status.clone(),
            version: VersionToken::new(state.version.to_string()),
        })
    }

    async fn update_status(
        &self,
        version: &VersionToken,
        status: OperatorStatus,
    ) -> StoreResult<VersionToken> {
        let mut state = self.state.lock().await;
        let current = state.version.to_string();
        if current != version.as_str() {
            return Err(StoreError::status_conflict(format!(
                "the object has been modified; stored version {current}, presented {version}"
            )));
        }

        state.status = status;
        state.version += 1;
        let token = VersionToken::new(state.version.to_string());
        drop(state);

        self.updates.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(token.clone());
        Ok(token)
    }

    async fn watch(&self) -> StoreResult<StatusWatchStream> {
        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| future::ready(item.ok()));
        Ok(stream.boxed())
    }
}
