use std::collections::HashMap;
use std::path::Path;

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
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::core::DynamicObject;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use kube::ResourceExt;
use serde_json::json;
use tracing::debug;

use crate::config::ComposableDraSpec;
use crate::domain::inventory::LAST_USED_TIME_ANNOTATION;
use crate::domain::labels::LabelChanges;
use crate::domain::traits::ClusterStore;
use crate::domain::traits::StoreError;
use crate::infrastructure::k8s::claims;
use crate::infrastructure::k8s::crd::ComposabilityRequest;
use crate::infrastructure::k8s::crd::ComposableResource;

/// [`ClusterStore`] backed by the Kubernetes API server.
pub struct KubeStore {
    client: Client,
    config_namespace: String,
    config_name: String,
}

impl KubeStore {
    pub fn new(client: Client, config_namespace: String, config_name: String) -> Self {
        Self {
            client,
            config_namespace,
            config_name,
        }
    }

    /// Connect using `kubeconfig`, or the inferred in-cluster / local config
    /// when no path is given.
    pub async fn connect(
        kubeconfig: Option<&Path>,
        config_namespace: String,
        config_name: String,
    ) -> Result<Self, Report<StoreError>> {
        let config = match kubeconfig {
            Some(path) => {
                let unreadable = || StoreError::KubeconfigUnreadable {
                    path: path.display().to_string(),
                };
                let kubeconfig = Kubeconfig::read_from(path).change_context_lazy(unreadable)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .change_context_lazy(unreadable)?
            }
            None => Config::infer()
                .await
                .change_context(StoreError::ConnectionFailed {
                    message: "no in-cluster or local kubeconfig found".to_string(),
                })?,
        };
        debug!(cluster = %config.cluster_url, "connecting to Kubernetes API");

        let client = Client::try_from(config).change_context(StoreError::ConnectionFailed {
            message: "failed to build client".to_string(),
        })?;
        Ok(Self::new(client, config_namespace, config_name))
    }

    async fn list_slices(&self) -> Result<Vec<claims::SliceDevice>, Report<StoreError>> {
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &claims::resource_slice_api_resource());
        let slices = api
            .list(&ListParams::default())
            .await
            .change_context(StoreError::ReadFailed {
                kind: "ResourceSlice",
            })?;
        Ok(slices.items.iter().flat_map(claims::slice_devices).collect())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_composability_requests(
        &self,
    ) -> Result<Vec<ComposabilityRequestInfo>, Report<StoreError>> {
        let api: Api<ComposabilityRequest> = Api::all(self.client.clone());
        let requests = api
            .list(&ListParams::default())
            .await
            .change_context(StoreError::ReadFailed {
                kind: "ComposabilityRequest",
            })?;
        Ok(requests.items.iter().map(Into::into).collect())
    }

    async fn list_composable_resources(
        &self,
    ) -> Result<Vec<ComposableResourceInfo>, Report<StoreError>> {
        let api: Api<ComposableResource> = Api::all(self.client.clone());
        let resources = api
            .list(&ListParams::default())
            .await
            .change_context(StoreError::ReadFailed {
                kind: "ComposableResource",
            })?;
        Ok(resources.items.iter().map(Into::into).collect())
    }

    async fn update_last_used_time(
        &self,
        resource_name: &str,
        time: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<ComposableResource> = Api::all(self.client.clone());
        let patch = json!({
            "metadata": {
                "annotations": {
                    LAST_USED_TIME_ANNOTATION: time.to_rfc3339_opts(SecondsFormat::Secs, true)
                }
            }
        });
        api.patch(resource_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .change_context(StoreError::WriteFailed {
                kind: "ComposableResource",
                name: resource_name.to_string(),
            })?;
        Ok(())
    }

    async fn list_device_slices(&self) -> Result<Vec<DeviceSliceInfo>, Report<StoreError>> {
        Ok(self
            .list_slices()
            .await?
            .iter()
            .map(claims::SliceDevice::binding_info)
            .collect())
    }

    async fn list_resource_claims(&self) -> Result<Vec<ResourceClaimInfo>, Report<StoreError>> {
        let config = self.load_device_config().await?;
        let models: HashMap<claims::DeviceKey, String> = self
            .list_slices()
            .await?
            .iter()
            .filter_map(|device| {
                let model = config.model_for_attributes(&device.attributes)?.to_string();
                Some((device.key(), model))
            })
            .collect();

        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &claims::resource_claim_api_resource());
        let objects = api
            .list(&ListParams::default())
            .await
            .change_context(StoreError::ReadFailed {
                kind: "ResourceClaim",
            })?;
        Ok(objects
            .items
            .iter()
            .filter_map(|object| claims::claim_info(object, &models))
            .collect())
    }

    async fn set_claim_condition(
        &self,
        namespace: &str,
        name: &str,
        devices: &[String],
        condition: ClaimCondition,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &claims::resource_claim_api_resource(),
        );
        let key = format!("{namespace}/{name}");
        let mut claim = api.get(name).await.change_context(StoreError::NotFound {
            kind: "ResourceClaim",
            name: key.clone(),
        })?;

        if !claims::upsert_device_condition(&mut claim.data, devices, condition, Utc::now()) {
            debug!(claim = %key, %condition, "condition already set");
            return Ok(());
        }

        let body = serde_json::to_vec(&claim).change_context(StoreError::InvalidObject {
            kind: "ResourceClaim",
            name: key.clone(),
            message: "failed to encode claim".to_string(),
        })?;
        api.replace_status(name, &PostParams::default(), body)
            .await
            .change_context(StoreError::WriteFailed {
                kind: "ResourceClaim",
                name: key,
            })?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeLabels>, Report<StoreError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .change_context(StoreError::ReadFailed { kind: "Node" })?;
        Ok(nodes
            .items
            .iter()
            .map(|node| NodeLabels {
                name: node.name_any(),
                labels: node.labels().clone(),
            })
            .collect())
    }

    async fn update_node_labels(
        &self,
        node_name: &str,
        changes: &LabelChanges,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut node = api.get(node_name).await.change_context(StoreError::NotFound {
            kind: "Node",
            name: node_name.to_string(),
        })?;

        let labels = node.labels_mut();
        for label in &changes.add {
            labels.insert(label.clone(), "true".to_string());
        }
        for label in &changes.remove {
            labels.remove(label);
        }

        api.replace(node_name, &PostParams::default(), &node)
            .await
            .change_context(StoreError::WriteFailed {
                kind: "Node",
                name: node_name.to_string(),
            })?;
        Ok(())
    }

    async fn load_device_config(&self) -> Result<ComposableDraSpec, Report<StoreError>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.config_namespace);
        let key = format!("{}/{}", self.config_namespace, self.config_name);
        let config_map = api
            .get(&self.config_name)
            .await
            .change_context(StoreError::NotFound {
                kind: "ConfigMap",
                name: key.clone(),
            })?;

        ComposableDraSpec::from_config_map_data(&config_map.data.unwrap_or_default())
            .change_context(StoreError::InvalidObject {
                kind: "ConfigMap",
                name: key,
                message: "invalid device compatibility table".to_string(),
            })
    }
}
