//! Error types for object store and status client operations.
//!
//! Every backend classifies its failures into the same small taxonomy so
//! controllers can branch on the kind of failure rather than on backend
//! specific error values.

use thiserror::Error;

use crate::object::ResourceKind;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`ObjectStore`](crate::ObjectStore) and
/// [`StatusClient`](crate::StatusClient) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("{} \"{name}\" not found", kind.plural())]
    NotFound {
        /// Kind of the missing object.
        kind: ResourceKind,
        /// Name of the missing object.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{} \"{name}\" already exists", kind.plural())]
    AlreadyExists {
        /// Kind of the conflicting object.
        kind: ResourceKind,
        /// Name of the conflicting object.
        name: String,
    },

    /// The write carried a stale version token.
    #[error("Operation cannot be fulfilled on {target}: {message}")]
    Conflict {
        /// What was being written (e.g. `configmaps "x"`, `status`).
        target: String,
        /// Backend supplied detail.
        message: String,
    },

    /// The backend could not be reached or returned a malformed reply.
    #[error("Transport error during {operation}: {message}")]
    Transport {
        /// The operation that failed (e.g. "get", "update_status").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a not found error.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Creates a conflict error for an object write.
    pub fn object_conflict(kind: ResourceKind, name: &str, message: impl Into<String>) -> Self {
        Self::Conflict {
            target: format!("{} \"{}\"", kind.plural(), name),
            message: message.into(),
        }
    }

    /// Creates a conflict error for a status write.
    pub fn status_conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            target: "status".to_string(),
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true if the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Returns true if the write lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Transport { .. }
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::transport("redis", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found(ResourceKind::ConfigMap, "app-config");
        assert_eq!(err.to_string(), "configmaps \"app-config\" not found");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_secret_not_found_display() {
        let err = StoreError::not_found(ResourceKind::Secret, "serving-cert");
        assert_eq!(err.to_string(), "secrets \"serving-cert\" not found");
    }

    #[test]
    fn test_conflict() {
        let err = StoreError::object_conflict(ResourceKind::ConfigMap, "x", "stale version 3");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("configmaps \"x\""));

        let err = StoreError::status_conflict("version 4 != 5");
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn test_transport() {
        let err = StoreError::transport("get", "connection refused");
        assert_eq!(
            err.to_string(),
            "Transport error during get: connection refused"
        );
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }
}
