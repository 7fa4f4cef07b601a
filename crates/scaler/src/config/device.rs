//! Device compatibility table loaded from the scaler ConfigMap.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use api_types::ModelConstraint;
use api_types::NodeInfo;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// ConfigMap key holding the YAML encoded device list.
pub const DEVICE_INFO_KEY: &str = "device-info";
/// ConfigMap key holding the node label prefix.
pub const LABEL_PREFIX_KEY: &str = "label-prefix";
/// Suffix of the node label carrying the per-model device ceiling.
const SIZE_MAX_SUFFIX: &str = "-size-max";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ConfigMap key `{key}` is missing")]
    MissingKey { key: &'static str },
    #[error("Failed to parse device info: {message}")]
    InvalidDeviceInfo { message: String },
    #[error("Device index {index} is declared more than once")]
    DuplicateIndex { index: i32 },
}

/// One device family the cluster can compose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceInfo {
    pub index: i32,
    /// Model identifier used by composable resources and requests
    pub cdi_model_name: String,
    /// Resource slice attributes identifying this model
    #[serde(default)]
    pub dra_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub driver_name: String,
    /// Name used for the node label
    pub k8s_device_name: String,
    /// Indices of models that cannot be attached next to this one
    #[serde(default)]
    pub cannot_coexist_with: Vec<i32>,
}

/// Compatibility table plus the node label prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposableDraSpec {
    pub label_prefix: String,
    pub device_infos: Vec<DeviceInfo>,
}

impl ComposableDraSpec {
    /// Build the table from the `data` section of the scaler ConfigMap.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingKey`] if either required key is absent
    /// - [`ConfigError::InvalidDeviceInfo`] if the device list is not valid YAML
    /// - [`ConfigError::DuplicateIndex`] if two entries share an index
    pub fn from_config_map_data(
        data: &BTreeMap<String, String>,
    ) -> Result<Self, Report<ConfigError>> {
        let raw_devices = data.get(DEVICE_INFO_KEY).ok_or(ConfigError::MissingKey {
            key: DEVICE_INFO_KEY,
        })?;
        let label_prefix = data.get(LABEL_PREFIX_KEY).ok_or(ConfigError::MissingKey {
            key: LABEL_PREFIX_KEY,
        })?;

        let device_infos: Vec<DeviceInfo> =
            serde_yaml::from_str(raw_devices).change_context(ConfigError::InvalidDeviceInfo {
                message: format!("`{DEVICE_INFO_KEY}` is not a valid device list"),
            })?;

        let mut seen = BTreeSet::new();
        for info in &device_infos {
            if !seen.insert(info.index) {
                return Err(Report::new(ConfigError::DuplicateIndex { index: info.index }));
            }
        }
        for info in &device_infos {
            for excluded in info.cannot_coexist_with.iter().filter(|i| !seen.contains(i)) {
                tracing::warn!(
                    model = %info.cdi_model_name,
                    excluded,
                    "cannot-coexist-with references an unknown device index"
                );
            }
        }

        Ok(Self {
            label_prefix: label_prefix.trim().to_string(),
            device_infos,
        })
    }

    pub fn device_by_model(&self, model: &str) -> Option<&DeviceInfo> {
        self.device_infos
            .iter()
            .find(|info| info.cdi_model_name == model)
    }

    /// Fully qualified node label advertising `info`.
    pub fn device_label(&self, info: &DeviceInfo) -> String {
        format!("{}/{}", self.label_prefix, info.k8s_device_name)
    }

    /// Resolve the model of a resource slice device from its attributes.
    ///
    /// The first entry whose non-empty `dra-attributes` are all present with
    /// equal values wins.
    pub fn model_for_attributes(&self, attributes: &BTreeMap<String, String>) -> Option<&str> {
        self.device_infos
            .iter()
            .find(|info| {
                !info.dra_attributes.is_empty()
                    && info
                        .dra_attributes
                        .iter()
                        .all(|(key, value)| attributes.get(key) == Some(value))
            })
            .map(|info| info.cdi_model_name.as_str())
    }

    /// Derive a node's model constraints from its `<prefix>/<device>-size-max` labels.
    pub fn node_info(&self, name: &str, labels: &BTreeMap<String, String>) -> NodeInfo {
        let mut models = Vec::new();
        for info in &self.device_infos {
            let key = format!("{}{SIZE_MAX_SUFFIX}", self.device_label(info));
            let Some(value) = labels.get(&key) else {
                continue;
            };
            match value.trim().parse::<usize>() {
                Ok(max_device) => models.push(ModelConstraint {
                    model: info.cdi_model_name.clone(),
                    max_device,
                }),
                Err(e) => {
                    tracing::warn!(node = name, label = %key, value = %value, "ignoring invalid size label: {e}");
                }
            }
        }
        NodeInfo {
            name: name.to_string(),
            models,
        }
    }
}
