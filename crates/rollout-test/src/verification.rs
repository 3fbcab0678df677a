//! Verification helpers for testing revision controllers
//!
//! Provides assertion helpers over the in-memory store and status singleton

use rollout_common::{
    find_condition, ConditionStatus, ObjectContent, ResourceKind, StoredObject,
};
use thiserror::Error;

use crate::fixtures::{TestEnv, WriteCheckpoint};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected {kind} '{name}' not found")]
    ObjectNotFound { kind: ResourceKind, name: String },

    #[error("Expected {kind} '{name}' to be absent")]
    UnexpectedObject { kind: ResourceKind, name: String },

    #[error("Content mismatch for {kind} '{name}': expected {expected:?}, got {actual:?}")]
    ContentMismatch {
        kind: ResourceKind,
        name: String,
        expected: ObjectContent,
        actual: ObjectContent,
    },

    #[error("{kind} '{name}' is not owned by '{owner}'")]
    NotOwned {
        kind: ResourceKind,
        name: String,
        owner: String,
    },

    #[error("Expected latest available revision {expected}, found {actual}")]
    RevisionMismatch { expected: i32, actual: i32 },

    #[error("Condition '{condition}': expected {expected:?}, found {actual:?}")]
    ConditionMismatch {
        condition: String,
        expected: Option<ConditionStatus>,
        actual: Option<ConditionStatus>,
    },

    #[error("Expected no writes since checkpoint {since:?}, found {now:?}")]
    UnexpectedWrites {
        since: WriteCheckpoint,
        now: WriteCheckpoint,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Store and status verification helper
pub struct StoreVerifier<'a> {
    env: &'a TestEnv,
}

impl<'a> StoreVerifier<'a> {
    /// Create a new verifier
    pub fn new(env: &'a TestEnv) -> Self {
        Self { env }
    }

    /// Verify that an object exists and return it
    pub async fn assert_exists(&self, kind: ResourceKind, name: &str) -> VerifyResult<StoredObject> {
        self.env
            .store
            .snapshot(kind, &self.env.namespace, name)
            .await
            .ok_or_else(|| VerificationError::ObjectNotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Verify that an object does not exist
    pub async fn assert_absent(&self, kind: ResourceKind, name: &str) -> VerifyResult<()> {
        match self.env.store.snapshot(kind, &self.env.namespace, name).await {
            None => Ok(()),
            Some(_) => Err(VerificationError::UnexpectedObject {
                kind,
                name: name.to_string(),
            }),
        }
    }

    /// Verify an object's full content
    pub async fn assert_content(
        &self,
        kind: ResourceKind,
        name: &str,
        expected: &ObjectContent,
    ) -> VerifyResult<()> {
        let actual = self.assert_exists(kind, name).await?.content;
        if &actual != expected {
            return Err(VerificationError::ContentMismatch {
                kind,
                name: name.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Verify that a snapshot is owned by the named status marker
    pub async fn assert_owned_by(
        &self,
        kind: ResourceKind,
        name: &str,
        marker: &str,
    ) -> VerifyResult<()> {
        let owner = self.assert_exists(ResourceKind::ConfigMap, marker).await?;
        let object = self.assert_exists(kind, name).await?;
        if !object.is_owned_by(&owner) {
            return Err(VerificationError::NotOwned {
                kind,
                name: name.to_string(),
                owner: marker.to_string(),
            });
        }
        Ok(())
    }

    /// Verify the latest available revision
    pub async fn assert_revision(&self, expected: i32) -> VerifyResult<()> {
        let actual = self.env.latest_revision().await;
        if actual != expected {
            return Err(VerificationError::RevisionMismatch { expected, actual });
        }
        Ok(())
    }

    /// Verify a condition's status; `None` means the condition is absent
    pub async fn assert_condition(
        &self,
        condition: &str,
        expected: Option<ConditionStatus>,
    ) -> VerifyResult<()> {
        let status = self.env.status.status().await;
        let actual = find_condition(&status.conditions, condition).map(|c| c.status);
        if actual != expected {
            return Err(VerificationError::ConditionMismatch {
                condition: condition.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that nothing was written since `since`
    pub fn assert_no_writes_since(&self, since: WriteCheckpoint) -> VerifyResult<()> {
        let now = self.env.checkpoint();
        if now != since {
            return Err(VerificationError::UnexpectedWrites { since, now });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::source_fixtures;

    #[tokio::test]
    async fn test_assert_content() {
        let env = TestEnv::new();
        env.apply(source_fixtures::app_config("v1")).await;
        let verifier = StoreVerifier::new(&env);

        verifier
            .assert_content(
                ResourceKind::ConfigMap,
                "app-config",
                &ObjectContent::new().with_entry("k", "v1"),
            )
            .await
            .unwrap();

        let err = verifier
            .assert_content(ResourceKind::ConfigMap, "app-config", &ObjectContent::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ContentMismatch { .. }));
    }

    #[tokio::test]
    async fn test_assert_no_writes_since() {
        let env = TestEnv::new();
        let verifier = StoreVerifier::new(&env);
        let checkpoint = env.checkpoint();
        verifier.assert_no_writes_since(checkpoint).unwrap();

        env.apply(source_fixtures::app_config("v1")).await;
        assert!(verifier.assert_no_writes_since(checkpoint).is_err());
    }
}
