//! Seams between the decision engine and the control plane

use api_types::ClaimCondition;
use api_types::ComposabilityRequestInfo;
use api_types::ComposableResourceInfo;
use api_types::DeviceSliceInfo;
use api_types::NodeLabels;
use api_types::ResourceClaimInfo;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use thiserror::Error;

use crate::config::ComposableDraSpec;
use crate::domain::labels::LabelChanges;

/// Errors raised by a [`ClusterStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot load kubeconfig {path}")]
    KubeconfigUnreadable { path: String },
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to read {kind}")]
    ReadFailed { kind: &'static str },
    #[error("Failed to update {kind} {name}")]
    WriteFailed { kind: &'static str, name: String },
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("Invalid {kind} {name}: {message}")]
    InvalidObject {
        kind: &'static str,
        name: String,
        message: String,
    },
}

/// Every read and write the engine performs against the control plane.
///
/// Calls are awaited one at a time by the evaluators; implementations do not
/// retry and surface every failure to the caller.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Pending provisioning requests across the cluster
    async fn list_composability_requests(
        &self,
    ) -> Result<Vec<ComposabilityRequestInfo>, Report<StoreError>>;

    /// Live composable resources across the cluster
    async fn list_composable_resources(
        &self,
    ) -> Result<Vec<ComposableResourceInfo>, Report<StoreError>>;

    /// Stamp the last-used annotation of a composable resource
    async fn update_last_used_time(
        &self,
        resource_name: &str,
        time: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>>;

    /// Binding status of every device published in resource slices
    async fn list_device_slices(&self) -> Result<Vec<DeviceSliceInfo>, Report<StoreError>>;

    /// Allocated resource claims across all nodes
    async fn list_resource_claims(&self) -> Result<Vec<ResourceClaimInfo>, Report<StoreError>>;

    /// Re-fetch the claim and set `condition` to true on the status entries
    /// of `devices`. Entries of other devices are not touched.
    async fn set_claim_condition(
        &self,
        namespace: &str,
        name: &str,
        devices: &[String],
        condition: ClaimCondition,
    ) -> Result<(), Report<StoreError>>;

    async fn list_nodes(&self) -> Result<Vec<NodeLabels>, Report<StoreError>>;

    /// Apply label additions and removals to a node in a single update
    async fn update_node_labels(
        &self,
        node_name: &str,
        changes: &LabelChanges,
    ) -> Result<(), Report<StoreError>>;

    /// Compatibility table and label prefix
    async fn load_device_config(&self) -> Result<ComposableDraSpec, Report<StoreError>>;
}

/// Trait for getting current time
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed [`TimeSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
