//! Client traits for the backing object store and the status singleton.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreResult;
use crate::object::{ObjectContent, ResourceKind, StoredObject, WatchEvent};
use crate::status::{OperatorStatus, StatusSnapshot, VersionToken};

/// Stream of changes for one watched kind and namespace.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Stream of status versions, one item per observed status write.
pub type StatusWatchStream = BoxStream<'static, VersionToken>;

/// Typed CRUD and watch access to named, namespaced objects.
///
/// # Contract
///
/// - `get` fails with `NotFound` when the object is absent, distinct from
///   transport failures.
/// - `create` fails with `AlreadyExists` when the name is taken and
///   assigns `uid` and `resource_version`.
/// - `update` requires `meta.resource_version` to equal the stored one and
///   fails with `Conflict` otherwise.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one object.
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> StoreResult<StoredObject>;

    /// Creates a new object and returns it as stored.
    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replaces an existing object and returns it as stored.
    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Lists every object of a kind in a namespace.
    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<StoredObject>>;

    /// Streams changes to objects of a kind in a namespace.
    async fn watch(&self, kind: ResourceKind, namespace: &str) -> StoreResult<WatchStream>;
}

/// Versioned access to the operator status singleton.
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Reads spec, status and the current version token.
    async fn get(&self) -> StoreResult<StatusSnapshot>;

    /// Writes `status` if `version` is still current; returns the new token.
    async fn update_status(
        &self,
        version: &VersionToken,
        status: OperatorStatus,
    ) -> StoreResult<VersionToken>;

    /// Streams a token every time the status singleton changes.
    async fn watch(&self) -> StoreResult<StatusWatchStream>;
}

/// `{get, create, update}` capability bound to one kind and namespace.
#[derive(Clone)]
pub struct KindClient {
    store: Arc<dyn ObjectStore>,
    kind: ResourceKind,
    namespace: String,
}

impl KindClient {
    /// Binds `store` to `kind` objects in `namespace`.
    pub fn new(store: Arc<dyn ObjectStore>, kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            store,
            kind,
            namespace: namespace.into(),
        }
    }

    /// Returns the bound kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the bound namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Builds an unsaved object of the bound kind and namespace.
    pub fn new_object(&self, name: impl Into<String>, content: ObjectContent) -> StoredObject {
        StoredObject::new(self.kind, self.namespace.clone(), name, content)
    }

    /// Fetches an object by name.
    pub async fn get(&self, name: &str) -> StoreResult<StoredObject> {
        self.store.get(self.kind, &self.namespace, name).await
    }

    /// Creates an object; kind and namespace are forced to the bound ones.
    pub async fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.store.create(self.rebind(object)).await
    }

    /// Updates an object; kind and namespace are forced to the bound ones.
    pub async fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.store.update(self.rebind(object)).await
    }

    fn rebind(&self, mut object: StoredObject) -> StoredObject {
        object.kind = self.kind;
        object.meta.namespace = self.namespace.clone();
        object
    }
}

impl std::fmt::Debug for KindClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindClient")
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .finish()
    }
}
