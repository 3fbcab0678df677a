//! Operator status object and condition helpers.
//!
//! The status object is a singleton guarded by a version token. Writers
//! read it, mutate a copy and write it back with the token they read; a
//! stale token fails with a conflict instead of overwriting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque version token for the status singleton.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl VersionToken {
    /// Creates a token from any string-like value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the controller is allowed to act.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementState {
    /// The controller reconciles normally.
    #[default]
    Managed,
    /// The controller leaves everything alone.
    Unmanaged,
    /// The operand is being removed; the controller leaves everything alone.
    Removed,
}

impl ManagementState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagementState::Managed => "Managed",
            ManagementState::Unmanaged => "Unmanaged",
            ManagementState::Removed => "Removed",
        }
    }
}

/// Desired-state half of the operator object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSpec {
    /// Management state.
    #[serde(default)]
    pub management_state: ManagementState,
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Condition state is unknown.
    Unknown,
}

/// An observation about the operator, surfaced to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type (e.g. "RevisionControllerFailing").
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition.
    pub status: ConditionStatus,
    /// Machine readable reason.
    #[serde(default)]
    pub reason: String,
    /// Human readable detail.
    #[serde(default)]
    pub message: String,
    /// Last time `status` flipped.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a condition stamped with the current time.
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// Sets the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Observed-state half of the operator object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorStatus {
    /// Highest revision whose snapshots have been published.
    #[serde(default)]
    pub latest_available_revision: i32,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl OperatorStatus {
    /// Creates a status at the given revision with no conditions.
    pub fn at_revision(revision: i32) -> Self {
        Self {
            latest_available_revision: revision,
            conditions: Vec::new(),
        }
    }
}

/// Result of reading the status singleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Spec as read.
    pub spec: OperatorSpec,
    /// Status as read.
    pub status: OperatorStatus,
    /// Token to present on the next write.
    pub version: VersionToken,
}

/// Inserts or updates a condition by type.
///
/// `last_transition_time` is only moved when the status actually flips, so
/// re-applying an identical condition leaves the list unchanged.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
            }
            existing.reason = new.reason;
            existing.message = new.message;
        }
        None => conditions.push(new),
    }
}

/// Removes a condition by type. Returns true if one was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

/// Looks up a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if the condition exists and is `True`.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}
