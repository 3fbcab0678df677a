//! Test fixtures for revision controller scenarios
//!
//! Provides an in-memory environment and reusable source changes

use std::sync::Arc;

use rollout_common::{
    InMemoryStatusClient, InMemoryStore, ObjectContent, OperatorStatus, ResourceKind,
    StoredObject,
};

/// Namespace used by the fixtures unless told otherwise
pub const TEST_NAMESPACE: &str = "rollout-test";

/// Source change operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOp {
    /// Create or overwrite the source
    Put,
    /// Delete the source
    Delete,
}

/// An external edit to a tracked source
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub kind: ResourceKind,
    pub name: String,
    pub op: SourceOp,
    pub content: ObjectContent,
}

impl SourceChange {
    /// Put a ConfigMap
    pub fn config_map(name: impl Into<String>) -> Self {
        Self::put(ResourceKind::ConfigMap, name)
    }

    /// Put a Secret
    pub fn secret(name: impl Into<String>) -> Self {
        Self::put(ResourceKind::Secret, name)
    }

    /// Put an object of any kind
    pub fn put(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            op: SourceOp::Put,
            content: ObjectContent::new(),
        }
    }

    /// Delete an object
    pub fn delete(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            op: SourceOp::Delete,
            content: ObjectContent::new(),
        }
    }

    /// Add a string entry
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.content = self.content.with_entry(key, value);
        self
    }

    /// Add a binary entry
    pub fn with_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.content = self.content.with_binary(key, value);
        self
    }
}

/// In-memory store and status singleton shared by a test
#[derive(Debug, Clone)]
pub struct TestEnv {
    pub namespace: String,
    pub store: Arc<InMemoryStore>,
    pub status: Arc<InMemoryStatusClient>,
}

impl TestEnv {
    /// Create an empty environment at revision 0
    pub fn new() -> Self {
        Self::at_revision(0)
    }

    /// Create an empty environment at the given revision
    pub fn at_revision(revision: i32) -> Self {
        Self {
            namespace: TEST_NAMESPACE.to_string(),
            store: Arc::new(InMemoryStore::new()),
            status: Arc::new(InMemoryStatusClient::new(OperatorStatus::at_revision(revision))),
        }
    }

    /// Apply one source change
    pub async fn apply(&self, change: SourceChange) -> Option<StoredObject> {
        match change.op {
            SourceOp::Put => Some(
                self.store
                    .put(change.kind, &self.namespace, &change.name, change.content)
                    .await,
            ),
            SourceOp::Delete => {
                // Deleting something already gone is not an error here
                let _ = self
                    .store
                    .delete(change.kind, &self.namespace, &change.name)
                    .await;
                None
            }
        }
    }

    /// Apply several source changes in order
    pub async fn apply_all<I>(&self, changes: I)
    where
        I: IntoIterator<Item = SourceChange>,
    {
        for change in changes {
            self.apply(change).await;
        }
    }

    /// Current latest available revision
    pub async fn latest_revision(&self) -> i32 {
        self.status.status().await.latest_available_revision
    }

    /// Record write counters so a later check can prove nothing was written
    pub fn checkpoint(&self) -> WriteCheckpoint {
        WriteCheckpoint {
            objects: self.store.write_count(),
            status: self.status.update_count(),
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Write counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCheckpoint {
    pub objects: u64,
    pub status: u64,
}

/// Common source fixtures
pub mod source_fixtures {
    use super::*;

    /// `app-config` with a single `k` entry
    pub fn app_config(value: &str) -> SourceChange {
        SourceChange::config_map("app-config").with_entry("k", value)
    }

    /// A serving certificate secret
    pub fn serving_cert(cert: &[u8]) -> SourceChange {
        SourceChange::secret("serving-cert").with_binary("tls.crt", cert.to_vec())
    }
}
