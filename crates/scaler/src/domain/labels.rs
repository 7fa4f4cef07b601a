//! Node label synchronisation.
//!
//! A node advertises `<prefix>/<device> = "true"` for every device family
//! that can currently be admitted. A family is suppressed as soon as any
//! model present on the cluster lists it in its `cannot-coexist-with` set.

use std::collections::BTreeSet;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;

use crate::config::ComposableDraSpec;
use crate::domain::error::EngineError;
use crate::domain::inventory::present_models;
use crate::domain::traits::ClusterStore;

/// Labels to add (with value `"true"`) and labels to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelChanges {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

/// Compute label changes for the models currently present on the cluster.
pub fn compute_label_changes(spec: &ComposableDraSpec, present: &BTreeSet<String>) -> LabelChanges {
    let suppressed: BTreeSet<i32> = spec
        .device_infos
        .iter()
        .filter(|info| present.contains(&info.cdi_model_name))
        .flat_map(|info| info.cannot_coexist_with.iter().copied())
        .collect();

    let mut changes = LabelChanges::default();
    for info in &spec.device_infos {
        let label = spec.device_label(info);
        if suppressed.contains(&info.index) {
            changes.remove.insert(label);
        } else {
            changes.add.insert(label);
        }
    }
    changes
}

pub struct LabelSynchronizer<'a> {
    store: &'a dyn ClusterStore,
    spec: &'a ComposableDraSpec,
}

impl<'a> LabelSynchronizer<'a> {
    pub fn new(store: &'a dyn ClusterStore, spec: &'a ComposableDraSpec) -> Self {
        Self { store, spec }
    }

    /// Recompute and apply the device labels of `node_name`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InventoryRead`] if requests or resources cannot be listed
    /// - [`EngineError::NodeUpdate`] if the node update is rejected
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, node_name: &str) -> Result<LabelChanges, Report<EngineError>> {
        let requests = self
            .store
            .list_composability_requests()
            .await
            .change_context(EngineError::InventoryRead {
                what: "composability requests",
            })?;
        let resources = self
            .store
            .list_composable_resources()
            .await
            .change_context(EngineError::InventoryRead {
                what: "composable resources",
            })?;

        let present = present_models(&requests, &resources);
        let changes = compute_label_changes(self.spec, &present);

        self.store
            .update_node_labels(node_name, &changes)
            .await
            .change_context(EngineError::NodeUpdate {
                node: node_name.to_string(),
            })?;

        info!(
            present = ?present,
            added = changes.add.len(),
            removed = changes.remove.len(),
            "node device labels synchronised"
        );
        Ok(changes)
    }
}
