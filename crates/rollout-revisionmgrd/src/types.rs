//! Type definitions for revisionmgrd

use rollout_common::{KindClient, ObjectContent, ResourceKind};
use serde::{Deserialize, Serialize};

/// Condition type set while revision content cannot be created
pub const FAILING_CONDITION: &str = "RevisionControllerFailing";

/// Reason attached to the failing condition
pub const CONTENT_CREATION_ERROR: &str = "ContentCreationError";

/// Status recorded on a freshly created status marker
pub const STATUS_IN_PROGRESS: &str = "InProgress";

/// Prefix of per-revision status marker names
pub const STATUS_MARKER_PREFIX: &str = "revision-status";

/// The single work queue key every change collapses onto
pub const WORK_QUEUE_KEY: &str = "key";

/// Event reasons
pub mod event_reasons {
    pub const REVISION_TRIGGERED: &str = "RevisionTriggered";
    pub const REVISION_CREATE: &str = "RevisionCreate";
    pub const REVISION_CREATE_FAILED: &str = "RevisionCreateFailed";
}

/// A tracked resource and whether its absence is tolerable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionResource {
    /// Source object name
    pub name: String,
    /// Missing sources are treated as empty instead of failing
    #[serde(default)]
    pub optional: bool,
}

impl RevisionResource {
    /// Create a required resource descriptor
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    /// Create an optional resource descriptor
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// A descriptor bound to the client for its kind
#[derive(Debug, Clone)]
pub struct TrackedResource {
    pub descriptor: RevisionResource,
    pub client: KindClient,
}

impl TrackedResource {
    /// Bind a descriptor to a client
    pub fn new(descriptor: RevisionResource, client: KindClient) -> Self {
        Self { descriptor, client }
    }

    pub fn kind(&self) -> ResourceKind {
        self.client.kind()
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_optional(&self) -> bool {
        self.descriptor.optional
    }

    /// `configmap/app-config` style label used in reasons
    pub fn label(&self) -> String {
        format!("{}/{}", self.kind().singular(), self.name())
    }
}

/// Snapshot name for a source at a revision: `<name>-<revision>`
pub fn snapshot_name(name: &str, revision: i32) -> String {
    format!("{}-{}", name, revision)
}

/// Status marker name for a revision: `revision-status-<revision>`
pub fn status_marker_name(revision: i32) -> String {
    format!("{}-{}", STATUS_MARKER_PREFIX, revision)
}

/// True if `name` has the form `<base>-<digits>`
pub fn is_numbered_name(name: &str, base: &str) -> bool {
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Explains why tracking `name` next to `others` of the same kind would let
/// a snapshot or status marker overwrite another object.
pub fn name_collision(kind: ResourceKind, name: &str, others: &[&str]) -> Option<String> {
    if kind == ResourceKind::ConfigMap
        && (name == STATUS_MARKER_PREFIX || is_numbered_name(name, STATUS_MARKER_PREFIX))
    {
        return Some(format!("'{}' collides with status marker names", name));
    }
    others
        .iter()
        .filter(|other| **other != name)
        .find(|other| is_numbered_name(name, other))
        .map(|other| format!("'{}' collides with snapshot names of '{}'", name, other))
}

/// Content written to a new status marker
pub fn status_marker_content(revision: i32) -> ObjectContent {
    ObjectContent::new()
        .with_entry("status", STATUS_IN_PROGRESS)
        .with_entry("revision", revision.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_common::InMemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_naming() {
        assert_eq!(snapshot_name("app-config", 3), "app-config-3");
        assert_eq!(status_marker_name(1), "revision-status-1");
    }

    #[test]
    fn test_numbered_name() {
        assert!(is_numbered_name("app-1", "app"));
        assert!(is_numbered_name("revision-status-12", "revision-status"));
        assert!(!is_numbered_name("app-", "app"));
        assert!(!is_numbered_name("app-v1", "app"));
        assert!(!is_numbered_name("application-1", "app"));
        assert!(!is_numbered_name("app", "app"));
    }

    #[test]
    fn test_name_collision() {
        let names = ["app", "app-1", "other"];
        assert_eq!(name_collision(ResourceKind::ConfigMap, "app", &names), None);
        assert!(name_collision(ResourceKind::ConfigMap, "app-1", &names)
            .unwrap()
            .contains("snapshot names of 'app'"));
        assert!(name_collision(ResourceKind::ConfigMap, "revision-status", &[])
            .unwrap()
            .contains("status marker"));
        assert!(name_collision(ResourceKind::ConfigMap, "revision-status-3", &[]).is_some());

        // Markers are ConfigMaps; a Secret may use the prefix
        assert_eq!(name_collision(ResourceKind::Secret, "revision-status", &[]), None);
    }

    #[test]
    fn test_status_marker_content() {
        let content = status_marker_content(7);
        assert_eq!(content.get("status"), Some("InProgress"));
        assert_eq!(content.get("revision"), Some("7"));
    }

    #[test]
    fn test_descriptor_deserialize_defaults_to_required() {
        let descriptor: RevisionResource = serde_yaml::from_str("name: app-config").unwrap();
        assert_eq!(descriptor, RevisionResource::required("app-config"));
    }

    #[test]
    fn test_tracked_resource_label() {
        let client = KindClient::new(Arc::new(InMemoryStore::new()), ResourceKind::Secret, "ns");
        let tracked = TrackedResource::new(RevisionResource::optional("serving-cert"), client);
        assert_eq!(tracked.label(), "secret/serving-cert");
        assert!(tracked.is_optional());
    }
}
