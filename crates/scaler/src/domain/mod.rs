//! Admission and rescheduling decisions for fabric-composed devices.
//!
//! The evaluators in this module never talk to Kubernetes directly; every
//! read and write goes through [`ClusterStore`] so a pass can be exercised
//! against an in-memory store.

pub mod coexistence;
pub mod error;
pub mod failure;
pub mod inventory;
pub mod labels;
#[cfg(test)]
pub(crate) mod mock;
pub mod reclaim;
pub mod traits;

pub use coexistence::CoexistencePolicy;
pub use coexistence::CompatibilityTable;
pub use coexistence::Permissive;
pub use error::EngineError;
pub use failure::FailureEvaluator;
pub use labels::LabelChanges;
pub use labels::LabelSynchronizer;
pub use reclaim::ReclaimEvaluator;
pub use traits::ClusterStore;
pub use traits::StoreError;
pub use traits::SystemClock;
pub use traits::TimeSource;
