//! Common infrastructure for rollout controllers.
//!
//! This crate provides the pieces every controller in the workspace shares:
//!
//! - [`object`]: Named, namespaced objects and their content
//! - [`status`]: The operator status singleton and its conditions
//! - [`ObjectStore`] / [`StatusClient`]: Async store interfaces
//! - [`KindClient`]: A `{get, create, update}` capability bound to one kind
//! - [`WorkQueue`]: Deduplicating, rate-limited queue of pending keys
//! - [`informer`]: Watch loops that feed a [`ChangeObserver`]
//! - [`InMemoryStore`] / [`InMemoryStatusClient`]: In-process backends
//! - `redis_backend`: Redis backends (feature `redis`)
//!
//! # Architecture
//!
//! Controllers follow this pattern:
//!
//! 1. Informers watch the objects and status the controller cares about
//! 2. Every change enqueues one fixed key on a [`WorkQueue`]
//! 3. A single worker pops the key and runs one reconciliation pass
//! 4. Failed passes are re-added with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use rollout_common::{KindClient, InMemoryStore, ObjectContent, ResourceKind};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let config_maps = KindClient::new(store, ResourceKind::ConfigMap, "ns");
//! let obj = config_maps.new_object("app-config", ObjectContent::new().with_entry("k", "v1"));
//! config_maps.create(obj).await?;
//! ```

pub mod error;
pub mod informer;
pub mod memory;
pub mod object;
pub mod queue;
pub mod status;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis_backend;

// Re-export commonly used items at crate root
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStatusClient, InMemoryStore};
pub use object::{
    ObjectContent, ObjectMeta, OwnerReference, ResourceKind, StoredObject, WatchEvent,
    WatchEventType,
};
pub use queue::{ChangeObserver, KeyEnqueuer, RateLimiterConfig, WorkQueue};
pub use status::{
    find_condition, is_condition_true, remove_condition, set_condition, Condition,
    ConditionStatus, ManagementState, OperatorSpec, OperatorStatus, StatusSnapshot, VersionToken,
};
pub use store::{KindClient, ObjectStore, StatusClient, StatusWatchStream, WatchStream};
