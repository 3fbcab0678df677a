//! Error types for the revision controller.

use rollout_common::StoreError;
use thiserror::Error;

use crate::state::{SyncEvent, SyncState};

/// Result type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while reconciling revisions.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store or status client failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A snapshot for the given resource could not be written.
    #[error("failed to copy {resource}: {source}")]
    ContentCreation {
        /// `kind/name` of the source resource.
        resource: String,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// A snapshot or marker for the given resource would overwrite another
    /// tracked object or status marker.
    #[error("refusing to write {name} for {resource}: name is already in use")]
    NameCollision {
        /// `kind/name` of the source resource.
        resource: String,
        /// The object name that would be overwritten.
        name: String,
    },

    /// Synthetic error returned after recording a failure condition so the
    /// key goes back through the rate-limited queue.
    #[error("synthetic requeue request: {reason}")]
    Requeue {
        /// Why the pass must be retried.
        reason: String,
    },

    /// Another writer advanced the revision first.
    #[error("lost race advancing revision: latest available revision is {current}, attempted {attempted}")]
    RevisionConflict {
        /// Revision found in the status.
        current: i32,
        /// Revision this pass tried to publish.
        attempted: i32,
    },

    /// The revision counter cannot be incremented any further.
    #[error("latest available revision {current} cannot be advanced")]
    RevisionOverflow {
        /// Revision found in the status.
        current: i32,
    },

    /// The pass took a transition the state machine does not allow.
    #[error("invalid transition from {from:?} on {event:?}")]
    InvalidTransition {
        /// State before the event.
        from: SyncState,
        /// The rejected event.
        event: SyncEvent,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The controller was cancelled mid-pass.
    #[error("controller stopped")]
    Stopped,
}

impl ControllerError {
    /// Creates a content creation error.
    pub fn content_creation(resource: impl Into<String>, source: StoreError) -> Self {
        Self::ContentCreation {
            resource: resource.into(),
            source,
        }
    }

    /// Creates a synthetic requeue error.
    pub fn requeue(reason: impl Into<String>) -> Self {
        Self::Requeue {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the root cause is a missing object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) | Self::ContentCreation { source: e, .. } => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if this is a stale version token on a write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}
