//! Reclaim and reschedule evaluation.
//!
//! A claim whose device is blocked on a binding precondition may be served
//! by an idle composable resource that was released at least one cooldown
//! ago. Such a resource is reserved for the claim and its last-used time is
//! stamped at the same moment. A claim that is neither progressing normally
//! nor served by a reusable resource is marked for rescheduling.

use std::collections::BTreeSet;

use api_types::ClaimCondition;
use api_types::ComposableResourceInfo;
use api_types::DeviceState;
use api_types::NodeInfo;
use api_types::ResourceClaimDevice;
use api_types::ResourceClaimInfo;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;

use crate::domain::error::EngineError;
use crate::domain::inventory::is_binding_pending;
use crate::domain::inventory::is_cooldown_elapsed;
use crate::domain::inventory::sort_by_creation_desc;
use crate::domain::traits::ClusterStore;
use crate::domain::traits::TimeSource;

/// Resources reserved for reuse during one evaluation pass.
///
/// Created empty at the start of every pass and dropped at its end.
#[derive(Debug, Default)]
pub struct ReservationSet {
    reserved: BTreeSet<String>,
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reserved(&self, resource_name: &str) -> bool {
        self.reserved.contains(resource_name)
    }

    /// Returns `false` if the resource was already reserved in this pass.
    pub fn reserve(&mut self, resource_name: &str) -> bool {
        self.reserved.insert(resource_name.to_string())
    }

    pub fn into_inner(self) -> BTreeSet<String> {
        self.reserved
    }
}

/// What a reclaim pass decided.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Resources reserved for reuse, by name
    pub reserved: BTreeSet<String>,
    /// Claims marked for rescheduling, as `namespace/name`
    pub rescheduled: Vec<String>,
}

pub struct ReclaimEvaluator<'a> {
    store: &'a dyn ClusterStore,
    clock: &'a dyn TimeSource,
}

impl<'a> ReclaimEvaluator<'a> {
    pub fn new(store: &'a dyn ClusterStore, clock: &'a dyn TimeSource) -> Self {
        Self { store, clock }
    }

    /// Reserve reusable resources for blocked claims and reschedule the rest.
    ///
    /// `claims` is sorted newest first in place.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InventoryRead`] if resources or slices cannot be listed
    /// - [`EngineError::ResourceUpdate`] if a reserved resource cannot be stamped
    /// - [`EngineError::ClaimUpdate`] if a reschedule condition cannot be persisted
    #[tracing::instrument(skip_all, fields(node = %node.name, claims = claims.len()))]
    pub async fn evaluate(
        &self,
        node: &NodeInfo,
        claims: &mut [ResourceClaimInfo],
    ) -> Result<ReclaimOutcome, Report<EngineError>> {
        let resources = self
            .store
            .list_composable_resources()
            .await
            .change_context(EngineError::InventoryRead {
                what: "composable resources",
            })?;
        let slices = self
            .store
            .list_device_slices()
            .await
            .change_context(EngineError::InventoryRead {
                what: "resource slices",
            })?;

        sort_by_creation_desc(claims);

        let now = self.clock.now();
        let mut reservations = ReservationSet::new();
        let mut rescheduled = Vec::new();

        'claims: for claim in claims.iter_mut() {
            for device in claim.devices.iter().filter(|d| d.state.is_preparing()) {
                if !is_binding_pending(&slices, &device.name) {
                    debug!(claim = %claim.key(), device = %device.name, "device is progressing");
                    continue 'claims;
                }
                if let Some(resource) = find_reusable(&resources, &reservations, device, now) {
                    reservations.reserve(&resource.name);
                    self.store
                        .update_last_used_time(&resource.name, now)
                        .await
                        .change_context(EngineError::ResourceUpdate {
                            name: resource.name.clone(),
                        })?;
                    info!(
                        claim = %claim.key(),
                        device = %device.name,
                        resource = %resource.name,
                        "reserved idle resource for reuse"
                    );
                    continue 'claims;
                }
            }

            let transitioned = claim.transition_preparing(DeviceState::Reschedule);
            self.store
                .set_claim_condition(
                    &claim.namespace,
                    &claim.name,
                    &transitioned,
                    ClaimCondition::FabricDeviceReschedule,
                )
                .await
                .change_context(EngineError::ClaimUpdate { claim: claim.key() })?;
            info!(claim = %claim.key(), devices = ?transitioned, "rescheduling resource claim");
            rescheduled.push(claim.key());
        }

        Ok(ReclaimOutcome {
            reserved: reservations.into_inner(),
            rescheduled,
        })
    }
}

/// First unreserved resource that can serve `device`.
///
/// The resource must carry the device's model, target the device's binding
/// key, not be online yet and have cooled down. Devices held by a pod never
/// take over another resource.
fn find_reusable<'r>(
    resources: &'r [ComposableResourceInfo],
    reservations: &ReservationSet,
    device: &ResourceClaimDevice,
    now: DateTime<Utc>,
) -> Option<&'r ComposableResourceInfo> {
    if device.used_by_pod {
        return None;
    }
    resources.iter().find(|resource| {
        !reservations.is_reserved(&resource.name)
            && resource.model == device.model
            && resource.target_node == device.name
            && !resource.is_online()
            && is_cooldown_elapsed(resource, now)
    })
}
