//! Revision creation.
//!
//! A revision is written marker first: `revision-status-N` is created (or
//! reused) and every snapshot `<name>-N` names it as owner, so deleting the
//! marker collects the whole revision. Snapshots are written one at a time
//! and the first failure stops the pass without undoing earlier writes;
//! retrying the same revision converges on the same objects.

use rollout_common::{KindClient, OwnerReference, ResourceKind, StoredObject};
use tracing::{debug, info, instrument};

use crate::error::{ControllerError, ControllerResult};
use crate::types::{
    snapshot_name, status_marker_content, status_marker_name, TrackedResource,
};

/// Writes the marker and every snapshot for `revision`.
#[instrument(skip(marker_client, tracked), fields(namespace = %marker_client.namespace()))]
pub async fn create_revision(
    marker_client: &KindClient,
    tracked: &[TrackedResource],
    revision: i32,
) -> ControllerResult<()> {
    check_target_names(tracked, revision)?;
    let marker = ensure_status_marker(marker_client, revision).await?;
    let owner = OwnerReference::to(&marker);

    for resource in tracked {
        let source = match resource.client.get(resource.name()).await {
            Ok(source) => source,
            Err(e) if e.is_not_found() && resource.is_optional() => {
                debug!(resource = %resource.label(), "Optional source absent; skipping");
                continue;
            }
            Err(e) => return Err(ControllerError::content_creation(resource.label(), e)),
        };

        let desired = resource
            .client
            .new_object(snapshot_name(resource.name(), revision), source.content)
            .owned_by(owner.clone());
        apply_snapshot(&resource.client, desired)
            .await
            .map_err(|e| match e {
                ControllerError::Store(source) => {
                    ControllerError::content_creation(resource.label(), source)
                }
                other => other,
            })?;
    }

    info!(revision, snapshots = tracked.len(), "Revision content written");
    Ok(())
}

/// Fails if the marker or any snapshot of `revision` would land on a
/// tracked source. Nothing is written in that case.
fn check_target_names(tracked: &[TrackedResource], revision: i32) -> ControllerResult<()> {
    let marker = status_marker_name(revision);
    let is_tracked = |kind: ResourceKind, name: &str| {
        tracked.iter().any(|t| t.kind() == kind && t.name() == name)
    };

    for resource in tracked {
        if resource.kind() == ResourceKind::ConfigMap && resource.name() == marker {
            return Err(ControllerError::NameCollision {
                resource: resource.label(),
                name: marker,
            });
        }
        let snapshot = snapshot_name(resource.name(), revision);
        let is_marker = resource.kind() == ResourceKind::ConfigMap && snapshot == marker;
        if is_marker || is_tracked(resource.kind(), &snapshot) {
            return Err(ControllerError::NameCollision {
                resource: resource.label(),
                name: snapshot,
            });
        }
    }
    Ok(())
}

/// Creates the status marker, or returns the existing one.
async fn ensure_status_marker(client: &KindClient, revision: i32) -> ControllerResult<StoredObject> {
    let name = status_marker_name(revision);
    let marker = client.new_object(name.clone(), status_marker_content(revision));

    match client.create(marker).await {
        Ok(created) => {
            debug!(marker = %name, "Created status marker");
            Ok(created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(marker = %name, "Reusing status marker");
            Ok(client.get(&name).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates `desired`, or brings an existing object of the same name in
/// line with it. Nothing is written when they already agree.
async fn apply_snapshot(client: &KindClient, desired: StoredObject) -> ControllerResult<StoredObject> {
    let existing = match client.get(desired.name()).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            let created = client.create(desired).await?;
            debug!(snapshot = %created.name(), "Created snapshot");
            return Ok(created);
        }
        Err(e) => return Err(e.into()),
    };

    let owners_match = desired
        .meta
        .owner_references
        .iter()
        .all(|r| existing.meta.owner_references.contains(r));
    if existing.content == desired.content && owners_match {
        return Ok(existing);
    }

    let mut updated = existing;
    updated.content = desired.content;
    for owner in desired.meta.owner_references {
        if !updated.meta.owner_references.contains(&owner) {
            updated.meta.owner_references.push(owner);
        }
    }
    let updated = client.update(updated).await?;
    debug!(snapshot = %updated.name(), "Updated snapshot");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RevisionResource;
    use rollout_common::{InMemoryStore, ObjectContent};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<InMemoryStore>,
        markers: KindClient,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let markers = KindClient::new(store.clone(), ResourceKind::ConfigMap, "ns");
            Self { store, markers }
        }

        fn tracked(&self, kind: ResourceKind, descriptor: RevisionResource) -> TrackedResource {
            TrackedResource::new(descriptor, KindClient::new(self.store.clone(), kind, "ns"))
        }
    }

    #[tokio::test]
    async fn test_creates_marker_and_owned_snapshots() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "app-config", ObjectContent::new().with_entry("k", "v1"))
            .await;
        f.store
            .put(ResourceKind::Secret, "ns", "cert", ObjectContent::new().with_binary("tls.key", vec![7]))
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("app-config")),
            f.tracked(ResourceKind::Secret, RevisionResource::required("cert")),
        ];

        create_revision(&f.markers, &tracked, 1).await.unwrap();

        let marker = f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .unwrap();
        assert_eq!(marker.content.get("status"), Some("InProgress"));
        assert_eq!(marker.content.get("revision"), Some("1"));

        let config = f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "app-config-1")
            .await
            .unwrap();
        assert_eq!(config.content.get("k"), Some("v1"));
        assert!(config.is_owned_by(&marker));

        let secret = f.store.snapshot(ResourceKind::Secret, "ns", "cert-1").await.unwrap();
        assert!(secret.is_owned_by(&marker));

        // Deleting the marker collects the revision
        let deleted = f
            .store
            .delete(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .unwrap();
        assert_eq!(deleted.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_required_source_fails_fast() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "second", ObjectContent::new())
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("first")),
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("second")),
        ];

        let err = create_revision(&f.markers, &tracked, 1).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("configmap/first"));

        // Marker stays; later resources are not attempted
        assert!(f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .is_some());
        assert!(f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "second-1")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_optional_missing_source_is_skipped() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "app-config", ObjectContent::new())
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::optional("extra")),
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("app-config")),
        ];

        create_revision(&f.markers, &tracked, 1).await.unwrap();
        assert!(f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "extra-1")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_retry_reuses_marker_and_converges() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "a", ObjectContent::new().with_entry("k", "v"))
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("a")),
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("b")),
        ];

        // First attempt writes the marker and a-1, then stops on b
        create_revision(&f.markers, &tracked, 1).await.unwrap_err();
        let marker_before = f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .unwrap();

        f.store
            .put(ResourceKind::ConfigMap, "ns", "b", ObjectContent::new().with_entry("k", "w"))
            .await;
        let writes_before = f.store.write_count();
        create_revision(&f.markers, &tracked, 1).await.unwrap();

        // Only b-1 is new
        assert_eq!(f.store.write_count(), writes_before + 1);
        let marker_after = f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .unwrap();
        assert_eq!(marker_before, marker_after);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_overwritten() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "a", ObjectContent::new().with_entry("k", "new"))
            .await;
        f.store
            .put(ResourceKind::ConfigMap, "ns", "a-1", ObjectContent::new().with_entry("k", "old"))
            .await;
        let tracked = [f.tracked(ResourceKind::ConfigMap, RevisionResource::required("a"))];

        create_revision(&f.markers, &tracked, 1).await.unwrap();

        let snapshot = f.store.snapshot(ResourceKind::ConfigMap, "ns", "a-1").await.unwrap();
        let marker = f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .unwrap();
        assert_eq!(snapshot.content.get("k"), Some("new"));
        assert!(snapshot.is_owned_by(&marker));
    }

    #[tokio::test]
    async fn test_refuses_snapshot_over_tracked_source() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "app", ObjectContent::new().with_entry("k", "from-app"))
            .await;
        f.store
            .put(ResourceKind::ConfigMap, "ns", "app-1", ObjectContent::new().with_entry("k", "user-data"))
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("app")),
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("app-1")),
        ];
        let writes_before = f.store.write_count();

        let err = create_revision(&f.markers, &tracked, 1).await.unwrap_err();
        assert!(matches!(
            &err,
            ControllerError::NameCollision { resource, name }
                if resource == "configmap/app" && name == "app-1"
        ));

        let live = f.store.snapshot(ResourceKind::ConfigMap, "ns", "app-1").await.unwrap();
        assert_eq!(live.content.get("k"), Some("user-data"));
        assert!(live.meta.owner_references.is_empty());
        assert_eq!(f.store.write_count(), writes_before);
    }

    #[tokio::test]
    async fn test_refuses_snapshot_over_status_marker() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "revision-status", ObjectContent::new().with_entry("k", "v"))
            .await;
        let tracked = [f.tracked(ResourceKind::ConfigMap, RevisionResource::required("revision-status"))];

        let err = create_revision(&f.markers, &tracked, 1).await.unwrap_err();
        assert!(matches!(
            &err,
            ControllerError::NameCollision { name, .. } if name == "revision-status-1"
        ));
        assert!(f
            .store
            .snapshot(ResourceKind::ConfigMap, "ns", "revision-status-1")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_refuses_tracked_source_named_like_marker() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "revision-status-2", ObjectContent::new())
            .await;
        let tracked = [f.tracked(ResourceKind::ConfigMap, RevisionResource::required("revision-status-2"))];

        // Revision 1 does not touch it, revision 2 would reuse it as the marker
        create_revision(&f.markers, &tracked, 1).await.unwrap();
        let err = create_revision(&f.markers, &tracked, 2).await.unwrap_err();
        assert!(matches!(err, ControllerError::NameCollision { .. }));
    }

    #[tokio::test]
    async fn test_same_name_across_kinds_is_allowed() {
        let f = Fixture::new();
        f.store
            .put(ResourceKind::ConfigMap, "ns", "app", ObjectContent::new())
            .await;
        f.store
            .put(ResourceKind::Secret, "ns", "app-1", ObjectContent::new())
            .await;
        let tracked = [
            f.tracked(ResourceKind::ConfigMap, RevisionResource::required("app")),
            f.tracked(ResourceKind::Secret, RevisionResource::required("app-1")),
        ];

        create_revision(&f.markers, &tracked, 1).await.unwrap();
        assert!(f
            .store
            .snapshot(ResourceKind::Secret, "ns", "app-1-1")
            .await
            .is_some());
    }
}
