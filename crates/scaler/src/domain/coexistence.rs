//! Whether two device models may be attached to the same node at once.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::config::ComposableDraSpec;

/// Pairwise coexistence check between two device models.
///
/// Implementations must be symmetric. Callers never pass the same model
/// twice, so the reflexive case is unspecified.
pub trait CoexistencePolicy: Send + Sync {
    fn can_coexist(&self, model_a: &str, model_b: &str) -> bool;
}

/// Policy that allows every pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Permissive;

impl CoexistencePolicy for Permissive {
    fn can_coexist(&self, _model_a: &str, _model_b: &str) -> bool {
        true
    }
}

/// Policy backed by the `cannot-coexist-with` lists of the device config.
///
/// Two models conflict when either one's exclusion list names the other's
/// index. Models missing from the table conflict with nothing.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityTable {
    index_by_model: HashMap<String, i32>,
    exclusions: HashMap<i32, BTreeSet<i32>>,
}

impl CompatibilityTable {
    pub fn new(spec: &ComposableDraSpec) -> Self {
        let mut table = Self::default();
        for info in &spec.device_infos {
            table
                .index_by_model
                .insert(info.cdi_model_name.clone(), info.index);
            table
                .exclusions
                .entry(info.index)
                .or_default()
                .extend(info.cannot_coexist_with.iter().copied());
        }
        table
    }

    fn excludes(&self, index: i32, other: i32) -> bool {
        self.exclusions
            .get(&index)
            .is_some_and(|excluded| excluded.contains(&other))
    }
}

impl CoexistencePolicy for CompatibilityTable {
    fn can_coexist(&self, model_a: &str, model_b: &str) -> bool {
        let (Some(&a), Some(&b)) = (
            self.index_by_model.get(model_a),
            self.index_by_model.get(model_b),
        ) else {
            return true;
        };
        !(self.excludes(a, b) || self.excludes(b, a))
    }
}
