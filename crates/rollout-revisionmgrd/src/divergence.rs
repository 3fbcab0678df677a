//! Divergence detection between live sources and the latest snapshots.

use rollout_common::{ObjectContent, StoreResult};
use tracing::debug;

use crate::types::{snapshot_name, TrackedResource};

/// Reports whether the snapshots of `revision` still match their sources.
///
/// Returns `(true, "")` when every tracked resource matches. Otherwise the
/// string holds one `kind/name has changed` reason per differing resource,
/// or the raw error text of the first required object that does not
/// exist. Errors other than not-found are returned so the pass is retried
/// instead of cutting a revision nothing asked for.
pub async fn is_latest_revision_current(
    tracked: &[TrackedResource],
    revision: i32,
) -> StoreResult<(bool, String)> {
    let mut reasons = Vec::new();

    for resource in tracked {
        let live = match fetch_content(resource, resource.name()).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok((false, e.to_string())),
            Err(e) => return Err(e),
        };
        let snapshot = match fetch_content(resource, &snapshot_name(resource.name(), revision)).await
        {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok((false, e.to_string())),
            Err(e) => return Err(e),
        };

        if live != snapshot {
            debug!(resource = %resource.label(), revision, "Source differs from snapshot");
            reasons.push(format!("{} has changed", resource.label()));
        }
    }

    if reasons.is_empty() {
        Ok((true, String::new()))
    } else {
        Ok((false, reasons.join(",")))
    }
}

/// Reads an object's content; a missing object of an optional resource
/// reads as empty.
async fn fetch_content(resource: &TrackedResource, name: &str) -> StoreResult<ObjectContent> {
    match resource.client.get(name).await {
        Ok(obj) => Ok(obj.content),
        Err(e) if e.is_not_found() && resource.is_optional() => Ok(ObjectContent::default()),
        Err(e) => Err(e),
    }
}
