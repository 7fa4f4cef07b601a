pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::coexistence;
pub use domain::failure;
pub use domain::labels;
pub use domain::reclaim;
pub use infrastructure::k8s;
