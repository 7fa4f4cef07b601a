use std::collections::HashMap;
use std::sync::Arc;

use api_types::NodeInfo;
use api_types::ResourceClaimInfo;
use error_stack::Report;
use error_stack::ResultExt;
use futures::future::join_all;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::config::ComposableDraSpec;
use crate::domain::ClusterStore;
use crate::domain::CoexistencePolicy;
use crate::domain::CompatibilityTable;
use crate::domain::EngineError;
use crate::domain::FailureEvaluator;
use crate::domain::LabelSynchronizer;
use crate::domain::ReclaimEvaluator;
use crate::domain::TimeSource;

/// Drives one evaluation pass over every managed node.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    clock: Arc<dyn TimeSource>,
    node_filter: Vec<String>,
}

impl Reconciler {
    /// `node_filter` restricts the pass to the named nodes; empty means all nodes.
    pub fn new(
        store: Arc<dyn ClusterStore>,
        clock: Arc<dyn TimeSource>,
        node_filter: Vec<String>,
    ) -> Self {
        Self {
            store,
            clock,
            node_filter,
        }
    }

    fn manages(&self, node_name: &str) -> bool {
        self.node_filter.is_empty() || self.node_filter.iter().any(|name| name == node_name)
    }

    /// Run the failure, reclaim and label passes on every managed node.
    ///
    /// Nodes are reconciled concurrently. A failing node does not stop the
    /// others; all node failures are returned together.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InventoryRead`] if the config, nodes or claims cannot be loaded
    /// - [`EngineError::NodeReconcile`] for every node whose pass failed
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<(), Report<EngineError>> {
        let spec = self
            .store
            .load_device_config()
            .await
            .change_context(EngineError::InventoryRead {
                what: "device config",
            })?;
        let policy = CompatibilityTable::new(&spec);

        let nodes: Vec<NodeInfo> = self
            .store
            .list_nodes()
            .await
            .change_context(EngineError::InventoryRead { what: "nodes" })?
            .into_iter()
            .filter(|node| self.manages(&node.name))
            .map(|node| spec.node_info(&node.name, &node.labels))
            .collect();

        let mut claims_by_node: HashMap<String, Vec<ResourceClaimInfo>> = HashMap::new();
        for claim in self
            .store
            .list_resource_claims()
            .await
            .change_context(EngineError::InventoryRead {
                what: "resource claims",
            })?
        {
            if claim.node_name.is_empty() {
                continue;
            }
            claims_by_node
                .entry(claim.node_name.clone())
                .or_default()
                .push(claim);
        }

        let passes = nodes.into_iter().map(|node| {
            let claims = claims_by_node.remove(&node.name).unwrap_or_default();
            self.reconcile_node(&spec, &policy, node, claims)
        });

        let mut failures: Option<Report<EngineError>> = None;
        for result in join_all(passes).await {
            if let Err(report) = result {
                error!("{report:?}");
                match failures.as_mut() {
                    Some(failures) => failures.extend_one(report),
                    None => failures = Some(report),
                }
            }
        }

        match failures {
            Some(failures) => Err(failures),
            None => Ok(()),
        }
    }

    async fn reconcile_node(
        &self,
        spec: &ComposableDraSpec,
        policy: &dyn CoexistencePolicy,
        node: NodeInfo,
        mut claims: Vec<ResourceClaimInfo>,
    ) -> Result<(), Report<EngineError>> {
        let context = || EngineError::NodeReconcile {
            node: node.name.clone(),
        };
        debug!(node = %node.name, claims = claims.len(), "reconciling node");

        FailureEvaluator::new(self.store.as_ref(), policy)
            .evaluate(&node, &mut claims)
            .await
            .change_context_lazy(context)?;

        let mut pending: Vec<ResourceClaimInfo> = claims
            .into_iter()
            .filter(ResourceClaimInfo::has_preparing_devices)
            .collect();
        let outcome = ReclaimEvaluator::new(self.store.as_ref(), self.clock.as_ref())
            .evaluate(&node, &mut pending)
            .await
            .change_context_lazy(context)?;

        LabelSynchronizer::new(self.store.as_ref(), spec)
            .sync(&node.name)
            .await
            .change_context_lazy(context)?;

        info!(
            node = %node.name,
            reserved = outcome.reserved.len(),
            rescheduled = outcome.rescheduled.len(),
            "node reconciled"
        );
        Ok(())
    }
}
