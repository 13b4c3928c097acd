//! External to internal node identifier mapping
//!
//! Internal indices are handed out densely in first-seen order, so the `i`-th
//! distinct external identifier becomes internal node `i`.

use rustc_hash::FxHashMap;

use crate::graph::{NodeId, SPECIAL_NODE_ID};

/// Bijective map from external node identifiers to dense internal indices
#[derive(Debug, Default)]
pub struct IdRemap {
    ext_to_int: FxHashMap<u32, NodeId>,
    int_to_ext: Vec<u32>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        let mut ext_to_int = FxHashMap::default();
        ext_to_int.reserve(n);
        Self {
            ext_to_int,
            int_to_ext: Vec::with_capacity(n),
        }
    }

    /// Internal index of `external_id`, if it has been seen
    pub fn resolve(&self, external_id: u32) -> Option<NodeId> {
        self.ext_to_int.get(&external_id).copied()
    }

    /// Return the index of `external_id`, assigning the next free one on first sight.
    ///
    /// Returns `None` for the reserved sentinel identifier, which can never be
    /// mapped.
    pub fn insert_if_absent(&mut self, external_id: u32) -> Option<NodeId> {
        if external_id == SPECIAL_NODE_ID {
            return None;
        }
        let next = self.int_to_ext.len() as NodeId;
        let id = *self.ext_to_int.entry(external_id).or_insert(next);
        if id == next {
            self.int_to_ext.push(external_id);
        }
        Some(id)
    }

    /// External identifier of an internal index
    pub fn external(&self, internal: NodeId) -> Option<u32> {
        self.int_to_ext.get(internal as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.int_to_ext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.int_to_ext.is_empty()
    }

    /// Consume the map, keeping only the internal-to-external table
    pub fn into_external_ids(self) -> Vec<u32> {
        self.int_to_ext
    }
}
