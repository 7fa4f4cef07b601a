use thiserror::Error;

/// Errors surfaced by an evaluation pass.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to read {what}")]
    InventoryRead { what: &'static str },
    #[error("Failed to update resource claim {claim}")]
    ClaimUpdate { claim: String },
    #[error("Failed to update composable resource {name}")]
    ResourceUpdate { name: String },
    #[error("Failed to update labels of node {node}")]
    NodeUpdate { node: String },
    #[error("Reconciliation of node {node} failed")]
    NodeReconcile { node: String },
}
