//! Slot patches: the deterministic delta the reducer emits.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Minimal delta to apply to conversation slots.
///
/// Backed by BTree collections so that serialising the same patch twice is
/// byte-equal, which is the diff-stability the reducer tests rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPatch {
    /// Slots to add or override.
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    /// Slots to delete.
    #[serde(default)]
    pub remove: BTreeSet<String>,
    /// Opaque keys the caller may use to evict downstream caches.
    #[serde(default)]
    pub cache_invalidation_keys: BTreeSet<String>,
}

impl SlotPatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty() && self.cache_invalidation_keys.is_empty()
    }

    /// Apply the patch to a slot map (used by tests and the demo wiring;
    /// the production store applies patches on the collaborator side).
    pub fn apply(&self, slots: &mut BTreeMap<String, String>) {
        for key in &self.remove {
            slots.remove(key);
        }
        for (key, value) in &self.set {
            slots.insert(key.clone(), value.clone());
        }
    }
}
