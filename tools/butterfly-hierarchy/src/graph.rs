//! Canonical graph model shared by every loader and pipeline stage
//!
//! Loaders produce a node coordinate table plus a list of [`CanonicalEdge`]
//! expressed in dense internal indices. Everything downstream (turn info,
//! spatial index, contraction) consumes this representation.

use butterfly_common::{Error, Result};

/// Dense zero-based node index assigned by the loaders
pub type NodeId = u32;

/// Reserved value that never names a real node
pub const SPECIAL_NODE_ID: NodeId = u32::MAX;

/// Edge type of ferry connections; such edges are not snappable
pub const FERRY_TYPE: i16 = 14;

/// One entry of the coordinate table. Coordinates are fixed-point degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub external_id: u32,
    pub lon: i32,
    pub lat: i32,
}

impl NodeRecord {
    pub fn new(external_id: u32, lat: i32, lon: i32) -> Self {
        Self {
            external_id,
            lon,
            lat,
        }
    }
}

/// Traversal direction of an input edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Both,
    Forward,
    Backward,
}

impl Direction {
    /// Decode the interchange direction code (0 = open, 1 = forward, 2 = backward)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Direction::Both),
            1 => Some(Direction::Forward),
            2 => Some(Direction::Backward),
            _ => None,
        }
    }

    pub fn flags(self) -> (bool, bool) {
        match self {
            Direction::Both => (true, true),
            Direction::Forward => (true, false),
            Direction::Backward => (false, true),
        }
    }
}

/// Turn-restriction flags produced by the turn-info step and copied verbatim
/// into the hierarchy file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnFlags {
    pub forward: bool,
    pub backward: bool,
}

/// A directed input edge in internal indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub name_id: u32,
    pub weight: i32,
    pub forward: bool,
    pub backward: bool,
    pub kind: i16,
    pub turn: TurnFlags,
}

impl CanonicalEdge {
    pub fn new(
        source: NodeId,
        target: NodeId,
        name_id: u32,
        weight: i32,
        direction: Direction,
        kind: i16,
    ) -> Self {
        let (forward, backward) = direction.flags();
        Self {
            source,
            target,
            name_id,
            weight,
            forward,
            backward,
            kind,
            turn: TurnFlags::default(),
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.forward && self.backward
    }

    /// Whether the spatial index should offer this edge as a snapping candidate
    pub fn is_locatable(&self) -> bool {
        self.kind != FERRY_TYPE
    }
}

/// Output of a loader that produces a coordinate table
#[derive(Debug, Default)]
pub struct LoadedGraph {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<CanonicalEdge>,
}

impl LoadedGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Coordinate of an internal node
    pub fn coordinate(&self, node: NodeId) -> Result<(i32, i32)> {
        self.nodes
            .get(node as usize)
            .map(|n| (n.lat, n.lon))
            .ok_or_else(|| {
                Error::invariant(format!(
                    "node {} out of range for {} coordinates",
                    node,
                    self.nodes.len()
                ))
            })
    }
}

/// Drop reserved-but-unused capacity. Contents and order are unchanged.
pub fn compact<T>(items: &mut Vec<T>) {
    items.shrink_to_fit();
}

/// Weight and endpoint checks that contraction relies on
pub fn check_edges(node_count: usize, edges: &[CanonicalEdge]) -> Result<()> {
    for (i, edge) in edges.iter().enumerate() {
        if edge.weight <= 0 {
            return Err(Error::invariant(format!(
                "edge {} ({} -> {}) has non-positive weight {}",
                i, edge.source, edge.target, edge.weight
            )));
        }
        if edge.source as usize >= node_count || edge.target as usize >= node_count {
            return Err(Error::invariant(format!(
                "edge {} ({} -> {}) references a node outside 0..{}",
                i, edge.source, edge.target, node_count
            )));
        }
        if !edge.forward && !edge.backward {
            return Err(Error::invariant(format!(
                "edge {} ({} -> {}) is closed in both directions",
                i, edge.source, edge.target
            )));
        }
    }
    Ok(())
}
