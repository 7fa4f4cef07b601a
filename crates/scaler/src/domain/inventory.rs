//! Read-only queries over claims and device inventory.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use api_types::ComposabilityRequestInfo;
use api_types::ComposableResourceInfo;
use api_types::DeviceSliceInfo;
use api_types::ResourceClaimInfo;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

/// Annotation recording when a composable resource was last released.
pub const LAST_USED_TIME_ANNOTATION: &str = "composable.test/last-used-time";

/// Minimum idle time before a released device may be reused.
pub const REUSE_COOLDOWN_SECS: i64 = 60;

/// Order claims newest first. The sort is stable, so claims created at the
/// same instant keep their relative input order.
pub fn sort_by_creation_desc(claims: &mut [ResourceClaimInfo]) {
    claims.sort_by(|a, b| b.creation_timestamp.cmp(&a.creation_timestamp));
}

/// Number of devices per model configured across `claims`, whatever their state.
pub fn configured_device_count(claims: &[ResourceClaimInfo]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for device in claims.iter().flat_map(|claim| claim.devices.iter()) {
        *counts.entry(device.model.clone()).or_insert(0) += 1;
    }
    counts
}

/// Whether the slice device `device_name` is still waiting on a binding
/// precondition. Unknown devices are not pending.
pub fn is_binding_pending(slices: &[DeviceSliceInfo], device_name: &str) -> bool {
    slices
        .iter()
        .any(|slice| slice.name == device_name && slice.binding_conditions_pending)
}

/// Models with positive pending demand or at least one online instance.
pub fn present_models(
    requests: &[ComposabilityRequestInfo],
    resources: &[ComposableResourceInfo],
) -> BTreeSet<String> {
    let requested = requests
        .iter()
        .filter(|request| request.size > 0)
        .map(|request| request.model.clone());
    let online = resources
        .iter()
        .filter(|resource| resource.is_online())
        .map(|resource| resource.model.clone());
    requested.chain(online).collect()
}

/// Whether `resource` has been idle for at least the reuse cooldown.
///
/// A missing or unparseable last-used annotation makes the resource
/// ineligible instead of failing the pass.
pub fn is_cooldown_elapsed(resource: &ComposableResourceInfo, now: DateTime<Utc>) -> bool {
    let Some(raw) = resource.last_used_time.as_deref() else {
        tracing::debug!(resource = %resource.name, "no {LAST_USED_TIME_ANNOTATION} annotation");
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(last_used) => {
            now.signed_duration_since(last_used.with_timezone(&Utc))
                >= Duration::seconds(REUSE_COOLDOWN_SECS)
        }
        Err(e) => {
            tracing::warn!(resource = %resource.name, value = raw, "unparseable last-used time: {e}");
            false
        }
    }
}
