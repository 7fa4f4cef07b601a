//! Custom resources owned by the composable resource operator.

use api_types::ComposabilityRequestInfo;
use api_types::ComposableResourceInfo;
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::inventory::LAST_USED_TIME_ANNOTATION;

/// Device family and count requested from the fabric.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScalarResourceDetails {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub model: String,
    pub size: i64,
    #[serde(default)]
    pub force_detach: bool,
    #[serde(default)]
    pub allocation_policy: String,
    #[serde(default)]
    pub target_node: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cro.hpsys.ibm.ie.com",
    version = "v1alpha1",
    kind = "ComposabilityRequest",
    status = "ComposabilityRequestStatus"
)]
pub struct ComposabilityRequestSpec {
    pub resource: ScalarResourceDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ComposabilityRequestStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: String,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cro.hpsys.ibm.ie.com",
    version = "v1alpha1",
    kind = "ComposableResource",
    status = "ComposableResourceStatus"
)]
pub struct ComposableResourceSpec {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub model: String,
    pub target_node: String,
    #[serde(default)]
    pub force_detach: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ComposableResourceStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub cdi_device_id: String,
}

impl From<&ComposabilityRequest> for ComposabilityRequestInfo {
    fn from(request: &ComposabilityRequest) -> Self {
        Self {
            name: request.name_any(),
            model: request.spec.resource.model.clone(),
            size: request.spec.resource.size,
        }
    }
}

impl From<&ComposableResource> for ComposableResourceInfo {
    fn from(resource: &ComposableResource) -> Self {
        Self {
            name: resource.name_any(),
            model: resource.spec.model.clone(),
            target_node: resource.spec.target_node.clone(),
            state: resource
                .status
                .as_ref()
                .map(|status| status.state.clone())
                .unwrap_or_default(),
            last_used_time: resource
                .annotations()
                .get(LAST_USED_TIME_ANNOTATION)
                .cloned(),
        }
    }
}
