//! Dynamic Resource Allocation objects.
//!
//! ResourceClaims and ResourceSlices are read as dynamic objects so the
//! scaler does not depend on a specific `resource.k8s.io` version of the
//! typed API bindings.

use std::collections::BTreeMap;
use std::collections::HashMap;

use api_types::ClaimCondition;
use api_types::DeviceSliceInfo;
use api_types::DeviceState;
use api_types::ResourceClaimDevice;
use api_types::ResourceClaimInfo;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use kube::core::ApiResource;
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::json;
use serde_json::Value;

const RESOURCE_GROUP: &str = "resource.k8s.io";
const RESOURCE_VERSION: &str = "v1beta1";
/// Node selector field carrying the allocated node name.
const NODE_NAME_FIELD: &str = "metadata.name";
/// Condition set by the driver once a device is usable.
const READY_CONDITION: &str = "Ready";

fn api_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: RESOURCE_GROUP.to_string(),
        version: RESOURCE_VERSION.to_string(),
        api_version: format!("{RESOURCE_GROUP}/{RESOURCE_VERSION}"),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

pub(crate) fn resource_claim_api_resource() -> ApiResource {
    api_resource("ResourceClaim", "resourceclaims")
}

pub(crate) fn resource_slice_api_resource() -> ApiResource {
    api_resource("ResourceSlice", "resourceslices")
}

/// Device names are only unique within a pool, so lookups key on both.
pub(crate) type DeviceKey = (String, String);

/// A device published in a resource slice, with its attributes flattened to strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SliceDevice {
    pub pool: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl SliceDevice {
    /// Binding status of the device.
    ///
    /// Binding conditions are not published by the `resource.k8s.io` version
    /// the scaler reads, so no device is ever reported as pending. Reading
    /// `bindingConditions` here is the only change needed once it is.
    pub(crate) fn binding_info(&self) -> DeviceSliceInfo {
        DeviceSliceInfo {
            name: self.name.clone(),
            binding_conditions_pending: false,
        }
    }

    pub(crate) fn key(&self) -> DeviceKey {
        (self.pool.clone(), self.name.clone())
    }
}

pub(crate) fn slice_devices(slice: &DynamicObject) -> Vec<SliceDevice> {
    let pool = slice
        .data
        .pointer("/spec/pool/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(devices) = slice.data.pointer("/spec/devices").and_then(Value::as_array) else {
        return Vec::new();
    };
    devices
        .iter()
        .filter_map(|device| {
            let name = device.get("name")?.as_str()?.to_string();
            let attributes = device
                .pointer("/basic/attributes")
                .and_then(Value::as_object)
                .map(|attributes| {
                    attributes
                        .iter()
                        .filter_map(|(key, value)| {
                            let value = attribute_value(value)?;
                            // qualified names drop their domain prefix
                            let key = key.rsplit('/').next().unwrap_or(key);
                            Some((key.to_string(), value))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(SliceDevice {
                pool: pool.clone(),
                name,
                attributes,
            })
        })
        .collect()
}

fn attribute_value(value: &Value) -> Option<String> {
    let (_, inner) = value.as_object()?.iter().next()?;
    match inner {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Node a claim was allocated to, from its allocation node selector.
fn allocated_node(data: &Value) -> Option<String> {
    data.pointer("/status/allocation/nodeSelector/nodeSelectorTerms")?
        .as_array()?
        .iter()
        .filter_map(|term| term.get("matchFields")?.as_array())
        .flatten()
        .find(|field| field.get("key").and_then(Value::as_str) == Some(NODE_NAME_FIELD))
        .and_then(|field| field.pointer("/values/0")?.as_str())
        .map(str::to_string)
}

fn condition_is_true(conditions: &[Value], condition_type: &str) -> bool {
    conditions.iter().any(|condition| {
        condition.get("type").and_then(Value::as_str) == Some(condition_type)
            && condition.get("status").and_then(Value::as_str) == Some("True")
    })
}

/// State of `device_name` derived from the claim's device status conditions.
fn device_state(data: &Value, device_name: &str) -> DeviceState {
    let conditions: Vec<Value> = data
        .pointer("/status/devices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| entry.get("device").and_then(Value::as_str) == Some(device_name))
        .filter_map(|entry| entry.get("conditions")?.as_array())
        .flatten()
        .cloned()
        .collect();

    if condition_is_true(&conditions, ClaimCondition::FabricDeviceFailed.as_str()) {
        DeviceState::Failed
    } else if condition_is_true(&conditions, ClaimCondition::FabricDeviceReschedule.as_str()) {
        DeviceState::Reschedule
    } else if condition_is_true(&conditions, READY_CONDITION) {
        DeviceState::Online
    } else {
        DeviceState::Preparing
    }
}

/// Convert an allocated claim into a [`ResourceClaimInfo`].
///
/// `models` maps `(pool, device)` pairs to model names. Returns `None` for
/// claims that are not allocated to a node yet.
pub(crate) fn claim_info(
    claim: &DynamicObject,
    models: &HashMap<DeviceKey, String>,
) -> Option<ResourceClaimInfo> {
    let node_name = allocated_node(&claim.data)?;
    let used_by_pod = claim
        .data
        .pointer("/status/reservedFor")
        .and_then(Value::as_array)
        .is_some_and(|consumers| !consumers.is_empty());

    let devices = claim
        .data
        .pointer("/status/allocation/devices/results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|result| {
            let pool = result.get("pool").and_then(Value::as_str).unwrap_or_default();
            let device_name = result.get("device")?.as_str()?;
            Some(ResourceClaimDevice {
                name: device_name.to_string(),
                model: models
                    .get(&(pool.to_string(), device_name.to_string()))
                    .cloned()
                    .unwrap_or_default(),
                state: device_state(&claim.data, device_name),
                used_by_pod,
            })
        })
        .collect();

    Some(ResourceClaimInfo {
        name: claim.name_any(),
        namespace: claim.namespace().unwrap_or_else(|| "default".to_string()),
        node_name,
        creation_timestamp: claim
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|time| time.0)
            .unwrap_or_default(),
        devices,
    })
}

/// Set `condition` to true on the status entries of `devices`.
///
/// A missing entry is seeded from the claim's allocation result for that
/// device. Existing conditions of the same type are updated in place and
/// entries of other devices are left untouched. Returns whether the object
/// changed.
pub(crate) fn upsert_device_condition(
    data: &mut Value,
    devices: &[String],
    condition: ClaimCondition,
    now: DateTime<Utc>,
) -> bool {
    let results: Vec<Value> = data
        .pointer("/status/allocation/devices/results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let Some(root) = data.as_object_mut() else {
        return false;
    };
    let status = root.entry("status").or_insert_with(|| json!({}));
    let Some(status) = status.as_object_mut() else {
        return false;
    };
    let entries = status.entry("devices").or_insert_with(|| json!([]));
    let Some(entries) = entries.as_array_mut() else {
        return false;
    };

    let entry_device = |entry: &Value| entry.get("device").and_then(Value::as_str).map(str::to_string);
    for result in &results {
        let Some(device) = entry_device(result) else {
            continue;
        };
        if devices.contains(&device) && !entries.iter().any(|e| entry_device(e).as_ref() == Some(&device)) {
            entries.push(json!({
                "driver": result.get("driver").cloned().unwrap_or(Value::Null),
                "pool": result.get("pool").cloned().unwrap_or(Value::Null),
                "device": device,
            }));
        }
    }

    let mut changed = false;
    for entry in entries.iter_mut() {
        if !entry_device(entry).is_some_and(|device| devices.contains(&device)) {
            continue;
        }
        let Some(entry) = entry.as_object_mut() else {
            continue;
        };
        let conditions = entry.entry("conditions").or_insert_with(|| json!([]));
        let Some(conditions) = conditions.as_array_mut() else {
            continue;
        };
        let existing = conditions.iter_mut().find(|c| {
            c.get("type").and_then(Value::as_str) == Some(condition.as_str())
        });
        match existing {
            Some(existing) if existing.get("status").and_then(Value::as_str) == Some("True") => {}
            Some(existing) => {
                existing["status"] = json!("True");
                existing["lastTransitionTime"] =
                    json!(now.to_rfc3339_opts(SecondsFormat::Secs, true));
                changed = true;
            }
            None => {
                conditions.push(json!({
                    "type": condition.as_str(),
                    "status": "True",
                    "reason": condition.as_str(),
                    "message": format!("{condition} set by dynamic device scaler"),
                    "lastTransitionTime": now.to_rfc3339_opts(SecondsFormat::Secs, true),
                }));
                changed = true;
            }
        }
    }
    changed
}
