//! Test adapters implementing the control-plane seams
//!
//! [`MockClusterStore`] keeps the whole cluster state in memory and records
//! every write, so evaluator tests can assert on persisted side effects.

use std::collections::BTreeMap;
use std::sync::Mutex;

use api_types::ClaimCondition;
use api_types::ComposabilityRequestInfo;
use api_types::ComposableResourceInfo;
use api_types::DeviceSliceInfo;
use api_types::NodeLabels;
use api_types::ResourceClaimInfo;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use error_stack::Report;

use super::labels::LabelChanges;
use super::traits::ClusterStore;
use super::traits::StoreError;
use super::traits::TimeSource;
use crate::config::ComposableDraSpec;

#[derive(Default)]
struct State {
    requests: Vec<ComposabilityRequestInfo>,
    resources: Vec<ComposableResourceInfo>,
    slices: Vec<DeviceSliceInfo>,
    claims: Vec<ResourceClaimInfo>,
    conditions: BTreeMap<String, Vec<ClaimCondition>>,
    device_conditions: BTreeMap<(String, String), Vec<ClaimCondition>>,
    nodes: BTreeMap<String, BTreeMap<String, String>>,
    config: ComposableDraSpec,
    stamped: Vec<String>,
    node_updates: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory cluster store for testing
#[derive(Default)]
pub struct MockClusterStore {
    state: Mutex<State>,
}

impl MockClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&self, model: &str, size: i64) {
        let mut state = self.state.lock().unwrap();
        let name = format!("request-{}", state.requests.len());
        state.requests.push(ComposabilityRequestInfo {
            name,
            model: model.to_string(),
            size,
        });
    }

    pub fn add_resource(&self, resource: ComposableResourceInfo) {
        self.state.lock().unwrap().resources.push(resource);
    }

    pub fn set_binding_pending(&self, device_name: &str, pending: bool) {
        self.state.lock().unwrap().slices.push(DeviceSliceInfo {
            name: device_name.to_string(),
            binding_conditions_pending: pending,
        });
    }

    pub fn add_claim(&self, claim: ResourceClaimInfo) {
        self.state.lock().unwrap().claims.push(claim);
    }

    pub fn add_node(&self, name: &str, labels: BTreeMap<String, String>) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(name.to_string(), labels);
    }

    pub fn set_config(&self, config: ComposableDraSpec) {
        self.state.lock().unwrap().config = config;
    }

    /// Make every list call fail
    pub fn set_fail_reads(&self, enabled: bool) {
        self.state.lock().unwrap().fail_reads = enabled;
    }

    /// Make every update call fail
    pub fn set_fail_writes(&self, enabled: bool) {
        self.state.lock().unwrap().fail_writes = enabled;
    }

    /// Conditions written to the claim `namespace/name`, in write order
    pub fn conditions(&self, claim_key: &str) -> Vec<ClaimCondition> {
        self.state
            .lock()
            .unwrap()
            .conditions
            .get(claim_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Conditions written to one device status entry of a claim
    pub fn device_conditions(&self, claim_key: &str, device: &str) -> Vec<ClaimCondition> {
        self.state
            .lock()
            .unwrap()
            .device_conditions
            .get(&(claim_key.to_string(), device.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn resource(&self, name: &str) -> Option<ComposableResourceInfo> {
        self.state
            .lock()
            .unwrap()
            .resources
            .iter()
            .find(|resource| resource.name == name)
            .cloned()
    }

    /// Names of resources whose last-used time was stamped, in write order
    pub fn stamped_resources(&self) -> Vec<String> {
        self.state.lock().unwrap().stamped.clone()
    }

    pub fn node_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn node_updates(&self) -> usize {
        self.state.lock().unwrap().node_updates
    }

    fn check_read(&self, kind: &'static str) -> Result<(), Report<StoreError>> {
        if self.state.lock().unwrap().fail_reads {
            return Err(Report::new(StoreError::ReadFailed { kind }));
        }
        Ok(())
    }

    fn check_write(&self, kind: &'static str, name: &str) -> Result<(), Report<StoreError>> {
        if self.state.lock().unwrap().fail_writes {
            return Err(Report::new(StoreError::WriteFailed {
                kind,
                name: name.to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MockClusterStore {
    async fn list_composability_requests(
        &self,
    ) -> Result<Vec<ComposabilityRequestInfo>, Report<StoreError>> {
        self.check_read("ComposabilityRequest")?;
        Ok(self.state.lock().unwrap().requests.clone())
    }

    async fn list_composable_resources(
        &self,
    ) -> Result<Vec<ComposableResourceInfo>, Report<StoreError>> {
        self.check_read("ComposableResource")?;
        Ok(self.state.lock().unwrap().resources.clone())
    }

    async fn update_last_used_time(
        &self,
        resource_name: &str,
        time: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>> {
        self.check_write("ComposableResource", resource_name)?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .iter_mut()
            .find(|resource| resource.name == resource_name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "ComposableResource",
                name: resource_name.to_string(),
            })?;
        resource.last_used_time = Some(time.to_rfc3339_opts(SecondsFormat::Secs, true));
        state.stamped.push(resource_name.to_string());
        Ok(())
    }

    async fn list_device_slices(&self) -> Result<Vec<DeviceSliceInfo>, Report<StoreError>> {
        self.check_read("ResourceSlice")?;
        Ok(self.state.lock().unwrap().slices.clone())
    }

    async fn list_resource_claims(&self) -> Result<Vec<ResourceClaimInfo>, Report<StoreError>> {
        self.check_read("ResourceClaim")?;
        Ok(self.state.lock().unwrap().claims.clone())
    }

    async fn set_claim_condition(
        &self,
        namespace: &str,
        name: &str,
        devices: &[String],
        condition: ClaimCondition,
    ) -> Result<(), Report<StoreError>> {
        let key = format!("{namespace}/{name}");
        self.check_write("ResourceClaim", &key)?;
        let mut state = self.state.lock().unwrap();
        if !state
            .claims
            .iter()
            .any(|claim| claim.namespace == namespace && claim.name == name)
        {
            return Err(Report::new(StoreError::NotFound {
                kind: "ResourceClaim",
                name: key,
            }));
        }
        for device in devices {
            let conditions = state
                .device_conditions
                .entry((key.clone(), device.clone()))
                .or_default();
            if !conditions.contains(&condition) {
                conditions.push(condition);
            }
        }
        let conditions = state.conditions.entry(key).or_default();
        if !conditions.contains(&condition) {
            conditions.push(condition);
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeLabels>, Report<StoreError>> {
        self.check_read("Node")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .map(|(name, labels)| NodeLabels {
                name: name.clone(),
                labels: labels.clone(),
            })
            .collect())
    }

    async fn update_node_labels(
        &self,
        node_name: &str,
        changes: &LabelChanges,
    ) -> Result<(), Report<StoreError>> {
        self.check_write("Node", node_name)?;
        let mut state = self.state.lock().unwrap();
        let labels = state
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Node",
                name: node_name.to_string(),
            })?;
        for label in &changes.add {
            labels.insert(label.clone(), "true".to_string());
        }
        for label in &changes.remove {
            labels.remove(label);
        }
        state.node_updates += 1;
        Ok(())
    }

    async fn load_device_config(&self) -> Result<ComposableDraSpec, Report<StoreError>> {
        self.check_read("ConfigMap")?;
        Ok(self.state.lock().unwrap().config.clone())
    }
}

/// Clock frozen at a fixed instant
pub struct FixedClock(pub DateTime<Utc>);

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
