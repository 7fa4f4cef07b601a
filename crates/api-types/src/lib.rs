//! Shared record types
//!
//! This crate contains the plain data records exchanged between the
//! decision engine and the control-plane adapters of the dynamic device
//! scaler: nodes and their per-model capacity, resource claims and their
//! devices, and snapshots of the composable resource inventory.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Lifecycle state of a device inside a resource claim.
///
/// Only [`DeviceState::Preparing`] devices are candidates for failure or
/// rescheduling. States the engine does not own are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceState {
    Preparing,
    Failed,
    Reschedule,
    Online,
    Other(String),
}

impl DeviceState {
    pub const fn is_preparing(&self) -> bool {
        matches!(self, Self::Preparing)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Preparing => "Preparing",
            Self::Failed => "Failed",
            Self::Reschedule => "Reschedule",
            Self::Online => "Online",
            Self::Other(state) => state,
        }
    }
}

impl From<&str> for DeviceState {
    fn from(value: &str) -> Self {
        match value {
            "Preparing" => Self::Preparing,
            "Failed" => Self::Failed,
            "Reschedule" => Self::Reschedule,
            "Online" => Self::Online,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for DeviceState {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<DeviceState> for String {
    fn from(state: DeviceState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum number of devices of one model a node may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConstraint {
    pub model: String,
    pub max_device: usize,
}

/// A node together with its per-model capacity constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub models: Vec<ModelConstraint>,
}

impl NodeInfo {
    /// Configured ceiling for `model`, if the node declares one.
    pub fn max_devices(&self, model: &str) -> Option<usize> {
        self.models
            .iter()
            .find(|constraint| constraint.model == model)
            .map(|constraint| constraint.max_device)
    }
}

/// Name and labels of a cluster node as read from the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabels {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A device requested by a resource claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaimDevice {
    /// Device name in the resource slice. Also the node binding key used
    /// when matching reusable composable resources.
    pub name: String,
    pub model: String,
    pub state: DeviceState,
    /// Whether a running pod currently holds the device
    pub used_by_pod: bool,
}

/// A resource claim allocated to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaimInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub creation_timestamp: DateTime<Utc>,
    pub devices: Vec<ResourceClaimDevice>,
}

impl ResourceClaimInfo {
    /// `namespace/name` identifier used in logs and bookkeeping.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn has_preparing_devices(&self) -> bool {
        self.devices.iter().any(|device| device.state.is_preparing())
    }

    /// Moves every `Preparing` device to `target` in place and returns the
    /// names of the devices that changed. Devices in any other state are
    /// left alone.
    pub fn transition_preparing(&mut self, target: DeviceState) -> Vec<String> {
        self.devices
            .iter_mut()
            .filter(|device| device.state.is_preparing())
            .map(|device| {
                device.state = target.clone();
                device.name.clone()
            })
            .collect()
    }
}

/// Snapshot of a live composable resource (an attached or attaching device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposableResourceInfo {
    pub name: String,
    pub model: String,
    pub target_node: String,
    pub state: String,
    /// Raw value of the last-used annotation, if any
    pub last_used_time: Option<String>,
}

impl ComposableResourceInfo {
    pub fn is_online(&self) -> bool {
        self.state == "Online"
    }
}

/// A pending provisioning request for `size` devices of `model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposabilityRequestInfo {
    pub name: String,
    pub model: String,
    pub size: i64,
}

/// Binding status of one device published in a resource slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSliceInfo {
    pub name: String,
    pub binding_conditions_pending: bool,
}

/// Conditions the engine writes onto resource claim device status entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimCondition {
    FabricDeviceFailed,
    FabricDeviceReschedule,
}

impl ClaimCondition {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FabricDeviceFailed => "FabricDeviceFailed",
            Self::FabricDeviceReschedule => "FabricDeviceReschedule",
        }
    }
}

impl fmt::Display for ClaimCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
