//! Kubernetes integration module.
//!
//! This module maps the engine's [`ClusterStore`](crate::domain::ClusterStore)
//! onto the Kubernetes API.
//!
//! The main components are:
//! - [`KubeStore`]: Reads inventory and persists decisions through `kube::Api`
//! - [`ComposableResource`] / [`ComposabilityRequest`]: Composable resource operator CRDs
//! - `claims`: Conversion of ResourceClaim and ResourceSlice objects

pub(crate) mod claims;
pub mod crd;
pub mod store;

pub use crd::ComposabilityRequest;
pub use crd::ComposableResource;
pub use store::KubeStore;
