//! Application module
//!
//! Wires the evaluators into a periodic reconciliation loop.

pub mod core;
pub mod reconciler;

// Re-export main types
pub use core::Application;
pub use reconciler::Reconciler;
