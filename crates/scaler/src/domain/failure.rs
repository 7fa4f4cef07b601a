//! Failure evaluation for claims that can never be satisfied on their node.
//!
//! Claims are processed newest first so that, under contention, the most
//! recent claims are the ones rejected. Every `Preparing` device of a claim
//! is vetted against three independent checks and the first violation fails
//! the whole claim. A final pass fails every claim holding a model whose
//! configured device count across the node exceeds the node's ceiling.

use api_types::ClaimCondition;
use api_types::ComposabilityRequestInfo;
use api_types::DeviceState;
use api_types::NodeInfo;
use api_types::ResourceClaimInfo;
use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::coexistence::CoexistencePolicy;
use crate::domain::error::EngineError;
use crate::domain::inventory::configured_device_count;
use crate::domain::inventory::sort_by_creation_desc;
use crate::domain::traits::ClusterStore;

/// Why a claim was failed.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Violation {
    #[display("{model} cannot coexist with {other} in the same claim")]
    IntraClaim { model: String, other: String },
    #[display("request {request} asks for {size} x {model}, node allows {max}")]
    RequestOverCapacity {
        request: String,
        model: String,
        size: i64,
        max: usize,
    },
    #[display("{model} cannot coexist with {other} requested by {request}")]
    RequestConflict {
        request: String,
        model: String,
        other: String,
    },
    #[display("{model} cannot coexist with {other} prepared for claim {claim}")]
    CrossClaim {
        claim: String,
        model: String,
        other: String,
    },
    #[display("{configured} x {model} configured on the node, limit is {max}")]
    CapacityExceeded {
        model: String,
        configured: usize,
        max: usize,
    },
}

pub struct FailureEvaluator<'a> {
    store: &'a dyn ClusterStore,
    policy: &'a dyn CoexistencePolicy,
}

impl<'a> FailureEvaluator<'a> {
    pub fn new(store: &'a dyn ClusterStore, policy: &'a dyn CoexistencePolicy) -> Self {
        Self { store, policy }
    }

    /// Fail every claim of `node` that violates coexistence or capacity rules.
    ///
    /// `claims` is sorted newest first in place and failed devices are
    /// updated in place, so later checks in the same pass observe them.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InventoryRead`] if pending requests cannot be listed
    /// - [`EngineError::ClaimUpdate`] if a failure condition cannot be persisted
    #[tracing::instrument(skip_all, fields(node = %node.name, claims = claims.len()))]
    pub async fn evaluate(
        &self,
        node: &NodeInfo,
        claims: &mut [ResourceClaimInfo],
    ) -> Result<(), Report<EngineError>> {
        let requests = self
            .store
            .list_composability_requests()
            .await
            .change_context(EngineError::InventoryRead {
                what: "composability requests",
            })?;

        sort_by_creation_desc(claims);

        for idx in 0..claims.len() {
            if let Some(violation) = self.find_violation(node, claims, idx, &requests) {
                self.fail_claim(&mut claims[idx], &violation).await?;
            }
        }

        let counts = configured_device_count(claims);
        for constraint in &node.models {
            let configured = counts.get(&constraint.model).copied().unwrap_or(0);
            if configured <= constraint.max_device {
                continue;
            }
            let violation = Violation::CapacityExceeded {
                model: constraint.model.clone(),
                configured,
                max: constraint.max_device,
            };
            warn!(%violation, "node capacity exceeded");
            for claim in claims
                .iter_mut()
                .filter(|claim| claim.devices.iter().any(|d| d.model == constraint.model))
            {
                self.fail_claim(claim, &violation).await?;
            }
        }

        Ok(())
    }

    fn find_violation(
        &self,
        node: &NodeInfo,
        claims: &[ResourceClaimInfo],
        idx: usize,
        requests: &[ComposabilityRequestInfo],
    ) -> Option<Violation> {
        let claim = &claims[idx];
        for (i, device) in claim.devices.iter().enumerate() {
            if !device.state.is_preparing() {
                continue;
            }

            for (j, other) in claim.devices.iter().enumerate() {
                if i != j
                    && device.model != other.model
                    && !self.policy.can_coexist(&device.model, &other.model)
                {
                    return Some(Violation::IntraClaim {
                        model: device.model.clone(),
                        other: other.model.clone(),
                    });
                }
            }

            for request in requests {
                if request.model == device.model {
                    if let Some(max) = node.max_devices(&device.model) {
                        if request.size > i64::try_from(max).unwrap_or(i64::MAX) {
                            return Some(Violation::RequestOverCapacity {
                                request: request.name.clone(),
                                model: request.model.clone(),
                                size: request.size,
                                max,
                            });
                        }
                    }
                } else if request.size > 0 && !self.policy.can_coexist(&device.model, &request.model)
                {
                    return Some(Violation::RequestConflict {
                        request: request.name.clone(),
                        model: device.model.clone(),
                        other: request.model.clone(),
                    });
                }
            }

            for (k, other_claim) in claims.iter().enumerate() {
                if k == idx {
                    continue;
                }
                let conflicting = other_claim.devices.iter().find(|other| {
                    other.state.is_preparing()
                        && other.model != device.model
                        && !self.policy.can_coexist(&device.model, &other.model)
                });
                if let Some(other) = conflicting {
                    return Some(Violation::CrossClaim {
                        claim: other_claim.key(),
                        model: device.model.clone(),
                        other: other.model.clone(),
                    });
                }
            }
        }
        None
    }

    async fn fail_claim(
        &self,
        claim: &mut ResourceClaimInfo,
        violation: &Violation,
    ) -> Result<(), Report<EngineError>> {
        let transitioned = claim.transition_preparing(DeviceState::Failed);
        if transitioned.is_empty() {
            debug!(claim = %claim.key(), %violation, "no preparing device left to fail");
            return Ok(());
        }
        info!(claim = %claim.key(), devices = ?transitioned, %violation, "failing resource claim");

        self.store
            .set_claim_condition(
                &claim.namespace,
                &claim.name,
                &transitioned,
                ClaimCondition::FabricDeviceFailed,
            )
            .await
            .change_context(EngineError::ClaimUpdate { claim: claim.key() })
    }
}

#[cfg(test)]
mod tests {
    use api_types::ModelConstraint;
    use api_types::ResourceClaimDevice;
    use chrono::TimeZone;
    use chrono::Utc;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::ComposableDraSpec;
    use crate::config::DeviceInfo;
    use crate::domain::coexistence::CompatibilityTable;
    use crate::domain::coexistence::Permissive;
    use crate::domain::mock::MockClusterStore;

    fn device(name: &str, model: &str, state: DeviceState) -> ResourceClaimDevice {
        ResourceClaimDevice {
            name: name.to_string(),
            model: model.to_string(),
            state,
            used_by_pod: false,
        }
    }

    fn claim(name: &str, created_secs: i64, devices: Vec<ResourceClaimDevice>) -> ResourceClaimInfo {
        ResourceClaimInfo {
            name: name.to_string(),
            namespace: "default".to_string(),
            node_name: "node-1".to_string(),
            creation_timestamp: Utc.timestamp_opt(created_secs, 0).unwrap(),
            devices,
        }
    }

    fn node(models: &[(&str, usize)]) -> NodeInfo {
        NodeInfo {
            name: "node-1".to_string(),
            models: models
                .iter()
                .map(|(model, max_device)| ModelConstraint {
                    model: model.to_string(),
                    max_device: *max_device,
                })
                .collect(),
        }
    }

    /// X and Y are mutually exclusive, Z coexists with everything.
    fn xy_exclusive() -> CompatibilityTable {
        let info = |index, model: &str, cannot_coexist_with| DeviceInfo {
            index,
            cdi_model_name: model.to_string(),
            dra_attributes: Default::default(),
            driver_name: String::new(),
            k8s_device_name: model.to_lowercase(),
            cannot_coexist_with,
        };
        CompatibilityTable::new(&ComposableDraSpec {
            label_prefix: "example.com".to_string(),
            device_infos: vec![info(1, "X", vec![2]), info(2, "Y", vec![]), info(3, "Z", vec![])],
        })
    }

    fn states(claim: &ResourceClaimInfo) -> Vec<DeviceState> {
        claim.devices.iter().map(|d| d.state.clone()).collect()
    }

    fn register(store: &MockClusterStore, claims: &[ResourceClaimInfo]) {
        for claim in claims {
            store.add_claim(claim.clone());
        }
    }

    #[test(tokio::test)]
    async fn global_capacity_fails_every_claim_of_model() {
        let store = MockClusterStore::new();
        let mut claims = vec![
            claim("c1", 1, vec![device("d1", "A", DeviceState::Preparing)]),
            claim("c2", 2, vec![device("d2", "A", DeviceState::Preparing)]),
            claim("c3", 3, vec![device("d3", "A", DeviceState::Preparing)]),
        ];
        register(&store, &claims);

        FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 2)]), &mut claims)
            .await
            .unwrap();

        for claim in &claims {
            assert_eq!(states(claim), vec![DeviceState::Failed]);
            assert_eq!(
                store.conditions(&claim.key()),
                vec![ClaimCondition::FabricDeviceFailed]
            );
        }
    }

    #[test(tokio::test)]
    async fn capacity_within_limit_leaves_claims_alone() {
        let store = MockClusterStore::new();
        let mut claims = vec![
            claim("c1", 1, vec![device("d1", "A", DeviceState::Preparing)]),
            claim("c2", 2, vec![device("d2", "A", DeviceState::Preparing)]),
        ];
        register(&store, &claims);

        FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 2)]), &mut claims)
            .await
            .unwrap();

        assert!(claims.iter().all(|c| c.has_preparing_devices()));
        assert!(store.conditions("default/c1").is_empty());
    }

    #[test(tokio::test)]
    async fn global_capacity_counts_devices_in_any_state() {
        let store = MockClusterStore::new();
        let mut claims = vec![
            claim(
                "bound",
                1,
                vec![device("d1", "A", DeviceState::Online), device("d2", "A", DeviceState::Online)],
            ),
            claim("new", 2, vec![device("d3", "A", DeviceState::Preparing)]),
        ];
        register(&store, &claims);

        FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 2)]), &mut claims)
            .await
            .unwrap();

        assert_eq!(states(&claims[0]), vec![DeviceState::Failed]);
        assert_eq!(states(&claims[1]), vec![DeviceState::Online, DeviceState::Online]);
        assert_eq!(
            store.device_conditions("default/new", "d3"),
            vec![ClaimCondition::FabricDeviceFailed]
        );
        assert!(store.conditions("default/bound").is_empty());
    }

    #[test(tokio::test)]
    async fn capacity_failure_marks_only_preparing_devices() {
        let store = MockClusterStore::new();
        let mut claims = vec![claim(
            "mixed",
            1,
            vec![
                device("d1", "A", DeviceState::Online),
                device("d2", "A", DeviceState::Preparing),
            ],
        )];
        register(&store, &claims);

        FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 1)]), &mut claims)
            .await
            .unwrap();

        assert_eq!(states(&claims[0]), vec![DeviceState::Online, DeviceState::Failed]);
        assert!(store.device_conditions("default/mixed", "d1").is_empty());
        assert_eq!(
            store.device_conditions("default/mixed", "d2"),
            vec![ClaimCondition::FabricDeviceFailed]
        );
    }

    #[test(tokio::test)]
    async fn intra_claim_conflict_is_symmetric() {
        for order in [["X", "Y"], ["Y", "X"]] {
            let store = MockClusterStore::new();
            let mut claims = vec![claim(
                "c1",
                1,
                vec![
                    device("d1", order[0], DeviceState::Preparing),
                    device("d2", order[1], DeviceState::Preparing),
                ],
            )];
            register(&store, &claims);

            FailureEvaluator::new(&store, &xy_exclusive())
                .evaluate(&node(&[]), &mut claims)
                .await
                .unwrap();

            assert_eq!(
                states(&claims[0]),
                vec![DeviceState::Failed, DeviceState::Failed],
                "order {order:?}"
            );
        }
    }

    #[test(tokio::test)]
    async fn intra_claim_conflict_with_non_preparing_device() {
        let store = MockClusterStore::new();
        let mut claims = vec![claim(
            "c1",
            1,
            vec![
                device("d1", "X", DeviceState::Online),
                device("d2", "Y", DeviceState::Preparing),
            ],
        )];
        register(&store, &claims);

        FailureEvaluator::new(&store, &xy_exclusive())
            .evaluate(&node(&[]), &mut claims)
            .await
            .unwrap();

        assert_eq!(states(&claims[0]), vec![DeviceState::Online, DeviceState::Failed]);
    }

    #[test(tokio::test)]
    async fn request_larger_than_node_limit_fails_claim() {
        let store = MockClusterStore::new();
        store.add_request("A", 3);
        let mut claims = vec![claim("c1", 1, vec![device("d1", "A", DeviceState::Preparing)])];
        register(&store, &claims);

        FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 2)]), &mut claims)
            .await
            .unwrap();

        assert_eq!(states(&claims[0]), vec![DeviceState::Failed]);
    }

    #[test(tokio::test)]
    async fn conflicting_request_fails_claim_only_when_sized() {
        let store = MockClusterStore::new();
        store.add_request("Y", 0);
        let mut claims = vec![claim("c1", 1, vec![device("d1", "X", DeviceState::Preparing)])];
        register(&store, &claims);
        let policy = xy_exclusive();

        FailureEvaluator::new(&store, &policy)
            .evaluate(&node(&[]), &mut claims)
            .await
            .unwrap();
        assert_eq!(states(&claims[0]), vec![DeviceState::Preparing]);

        store.add_request("Y", 1);
        FailureEvaluator::new(&store, &policy)
            .evaluate(&node(&[]), &mut claims)
            .await
            .unwrap();
        assert_eq!(states(&claims[0]), vec![DeviceState::Failed]);
    }

    #[test(tokio::test)]
    async fn cross_claim_conflict_fails_newer_claim_first() {
        let store = MockClusterStore::new();
        let mut claims = vec![
            claim("older", 1, vec![device("d1", "X", DeviceState::Preparing)]),
            claim("newer", 2, vec![device("d2", "Y", DeviceState::Preparing)]),
        ];
        register(&store, &claims);

        FailureEvaluator::new(&store, &xy_exclusive())
            .evaluate(&node(&[]), &mut claims)
            .await
            .unwrap();

        // newest first; once "newer" is failed the older claim no longer conflicts
        assert_eq!(claims[0].name, "newer");
        assert_eq!(states(&claims[0]), vec![DeviceState::Failed]);
        assert_eq!(claims[1].name, "older");
        assert_eq!(states(&claims[1]), vec![DeviceState::Preparing]);
        assert!(store.conditions("default/older").is_empty());
    }

    #[test(tokio::test)]
    async fn failed_devices_are_never_downgraded() {
        let store = MockClusterStore::new();
        let mut claims = vec![claim(
            "c1",
            1,
            vec![
                device("d1", "X", DeviceState::Reschedule),
                device("d2", "Y", DeviceState::Failed),
            ],
        )];
        register(&store, &claims);

        FailureEvaluator::new(&store, &xy_exclusive())
            .evaluate(&node(&[]), &mut claims)
            .await
            .unwrap();

        assert_eq!(
            states(&claims[0]),
            vec![DeviceState::Reschedule, DeviceState::Failed]
        );
        assert!(store.conditions("default/c1").is_empty());
    }

    #[test(tokio::test)]
    async fn read_failure_aborts_pass() {
        let store = MockClusterStore::new();
        store.set_fail_reads(true);
        let mut claims = vec![claim("c1", 1, vec![device("d1", "A", DeviceState::Preparing)])];

        let err = FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 0)]), &mut claims)
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            EngineError::InventoryRead { .. }
        ));
        assert_eq!(states(&claims[0]), vec![DeviceState::Preparing]);
    }

    #[test(tokio::test)]
    async fn write_failure_is_propagated() {
        let store = MockClusterStore::new();
        store.set_fail_writes(true);
        let mut claims = vec![claim("c1", 1, vec![device("d1", "A", DeviceState::Preparing)])];
        register(&store, &claims);

        let err = FailureEvaluator::new(&store, &Permissive)
            .evaluate(&node(&[("A", 0)]), &mut claims)
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            EngineError::ClaimUpdate { .. }
        ));
    }
}
