// Contraction Hierarchies preprocessing
//
// - Node ordering: lazy edge-difference priority, lowest contracted first
// - Contraction: remove nodes one by one, adding a shortcut wherever the
//   witness search finds no path around the removed node
// - Output: every arc stored once at its lower-ranked endpoint

pub mod cleanup;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use butterfly_common::{Error, Result};

use crate::formats::{EdgeData, EdgePayload, HierarchyEdge};
use crate::graph::{CanonicalEdge, NodeId, TurnFlags};

pub use cleanup::{Cleanup, DedupCleanup};

/// Settled-node budget of a single witness search
pub const DEFAULT_WITNESS_SETTLE_LIMIT: usize = 500;

pub trait Contractor: Send + Sync {
    /// Contract the graph, returning the hierarchy edges in output order
    fn contract(&self, node_count: usize, edges: &[CanonicalEdge]) -> Result<Vec<HierarchyEdge>>;
}

/// What a directed arc carries besides its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Arc {
    weight: i32,
    payload: EdgePayload,
    kind: i16,
    turn: TurnFlags,
}

/// Mutable directed graph used during contraction
struct Overlay {
    out: Vec<FxHashMap<NodeId, Arc>>,
    inc: Vec<FxHashSet<NodeId>>,
    contracted: Vec<bool>,
}

impl Overlay {
    fn new(node_count: usize, edges: &[CanonicalEdge]) -> Result<Self> {
        let mut overlay = Self {
            out: vec![FxHashMap::default(); node_count],
            inc: vec![FxHashSet::default(); node_count],
            contracted: vec![false; node_count],
        };
        for edge in edges {
            if edge.source == edge.target {
                continue;
            }
            if edge.source as usize >= node_count || edge.target as usize >= node_count {
                return Err(Error::invariant(format!(
                    "edge {} -> {} outside of {} nodes",
                    edge.source, edge.target, node_count
                )));
            }
            let arc = Arc {
                weight: edge.weight,
                payload: EdgePayload::Original { name: edge.name_id },
                kind: edge.kind,
                turn: edge.turn,
            };
            if edge.forward {
                overlay.offer(edge.source, edge.target, arc);
            }
            if edge.backward {
                overlay.offer(edge.target, edge.source, arc);
            }
        }
        Ok(overlay)
    }

    /// Insert `from -> to` unless an arc at least as short already exists
    fn offer(&mut self, from: NodeId, to: NodeId, arc: Arc) -> bool {
        let slot = &mut self.out[from as usize];
        match slot.get(&to) {
            Some(existing) if existing.weight <= arc.weight => false,
            _ => {
                slot.insert(to, arc);
                self.inc[to as usize].insert(from);
                true
            }
        }
    }

    fn arc_count(&self) -> usize {
        self.out.iter().map(|m| m.len()).sum()
    }

    /// Remaining in-arcs of `node` as `(neighbour, weight)`, sorted by neighbour
    fn incoming(&self, node: NodeId) -> Vec<(NodeId, i32)> {
        let mut arcs: Vec<(NodeId, i32)> = self.inc[node as usize]
            .iter()
            .filter(|&&u| !self.contracted[u as usize])
            .filter_map(|&u| self.out[u as usize].get(&node).map(|a| (u, a.weight)))
            .collect();
        arcs.sort_unstable();
        arcs
    }

    /// Remaining out-arcs of `node` as `(neighbour, weight)`, sorted by neighbour
    fn outgoing(&self, node: NodeId) -> Vec<(NodeId, i32)> {
        let mut arcs: Vec<(NodeId, i32)> = self.out[node as usize]
            .iter()
            .filter(|(&v, _)| !self.contracted[v as usize])
            .map(|(&v, a)| (v, a.weight))
            .collect();
        arcs.sort_unstable();
        arcs
    }

    /// Shortest distance from `from` to each target not passing through
    /// `avoid`, giving up past `limit` or `settle_limit` settled nodes.
    /// Targets not reached are absent from the result.
    fn witness_search(
        &self,
        from: NodeId,
        avoid: NodeId,
        limit: i64,
        settle_limit: usize,
    ) -> FxHashMap<NodeId, i64> {
        let mut dist: FxHashMap<NodeId, i64> = FxHashMap::default();
        let mut settled: FxHashMap<NodeId, i64> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        dist.insert(from, 0);
        heap.push(Reverse((0i64, from)));

        while let Some(Reverse((d, u))) = heap.pop() {
            if settled.contains_key(&u) {
                continue;
            }
            settled.insert(u, d);
            if d > limit || settled.len() > settle_limit {
                break;
            }
            for (&v, arc) in &self.out[u as usize] {
                if v == avoid || self.contracted[v as usize] {
                    continue;
                }
                let nd = d + arc.weight as i64;
                if nd <= limit && dist.get(&v).map_or(true, |&old| nd < old) {
                    dist.insert(v, nd);
                    heap.push(Reverse((nd, v)));
                }
            }
        }
        settled
    }

    /// Shortcuts that contracting `node` would require, as `(from, to, distance)`
    fn required_shortcuts(&self, node: NodeId, settle_limit: usize) -> Vec<(NodeId, NodeId, i64)> {
        let incoming = self.incoming(node);
        let outgoing = self.outgoing(node);
        let mut shortcuts = Vec::new();

        for &(u, w_in) in &incoming {
            let candidates: Vec<(NodeId, i64)> = outgoing
                .iter()
                .filter(|&&(x, _)| x != u)
                .map(|&(x, w_out)| (x, w_in as i64 + w_out as i64))
                .collect();
            let Some(limit) = candidates.iter().map(|&(_, w)| w).max() else {
                continue;
            };

            let reached = self.witness_search(u, node, limit, settle_limit);
            for (x, via) in candidates {
                if reached.get(&x).is_some_and(|&d| d <= via) {
                    continue;
                }
                shortcuts.push((u, x, via));
            }
        }
        shortcuts
    }
}

/// Narrow a shortcut distance to the on-disk width
fn shortcut_distance(from: NodeId, to: NodeId, middle: NodeId, distance: i64) -> Result<i32> {
    i32::try_from(distance).map_err(|_| {
        Error::invariant(format!(
            "shortcut {from} -> {to} via {middle} overflows distance ({distance})"
        ))
    })
}

/// Contraction with lazy edge-difference ordering and bounded witness search
#[derive(Debug, Clone, Copy)]
pub struct ChContractor {
    witness_settle_limit: usize,
}

impl Default for ChContractor {
    fn default() -> Self {
        Self {
            witness_settle_limit: DEFAULT_WITNESS_SETTLE_LIMIT,
        }
    }
}

impl ChContractor {
    pub fn with_settle_limit(witness_settle_limit: usize) -> Self {
        Self {
            witness_settle_limit: witness_settle_limit.max(1),
        }
    }

    /// Priority = shortcuts added - arcs removed + already contracted neighbours.
    /// Lower priority = contract earlier.
    fn priority(&self, overlay: &Overlay, node: NodeId, contracted_neighbours: u32) -> i64 {
        let shortcuts = overlay.required_shortcuts(node, self.witness_settle_limit);
        let removed = overlay.incoming(node).len() + overlay.outgoing(node).len();
        shortcuts.len() as i64 - removed as i64 + contracted_neighbours as i64
    }
}

impl Contractor for ChContractor {
    fn contract(&self, node_count: usize, edges: &[CanonicalEdge]) -> Result<Vec<HierarchyEdge>> {
        let start = Instant::now();
        let mut overlay = Overlay::new(node_count, edges)?;
        let original_arcs = overlay.arc_count();
        info!(nodes = node_count, arcs = original_arcs, "contracting");

        // Initial priorities only read the overlay, so they run on the pool.
        let initial: Vec<i64> = (0..node_count as NodeId)
            .into_par_iter()
            .map(|node| self.priority(&overlay, node, 0))
            .collect();

        let mut queue: BinaryHeap<Reverse<(i64, NodeId)>> = initial
            .into_iter()
            .enumerate()
            .map(|(node, p)| Reverse((p, node as NodeId)))
            .collect();

        let mut rank = vec![0u32; node_count];
        let mut contracted_neighbours = vec![0u32; node_count];
        let mut next_rank = 0u32;
        let mut shortcuts_added = 0usize;

        while let Some(Reverse((stale, node))) = queue.pop() {
            if overlay.contracted[node as usize] {
                continue;
            }
            // Lazy update: re-evaluate, and requeue if no longer the minimum
            let current = self.priority(&overlay, node, contracted_neighbours[node as usize]);
            if current > stale {
                if let Some(&Reverse((next, _))) = queue.peek() {
                    if current > next {
                        queue.push(Reverse((current, node)));
                        continue;
                    }
                }
            }

            for (from, to, distance) in overlay.required_shortcuts(node, self.witness_settle_limit) {
                let arc = Arc {
                    weight: shortcut_distance(from, to, node, distance)?,
                    payload: EdgePayload::Shortcut { middle: node },
                    kind: 0,
                    turn: TurnFlags::default(),
                };
                if overlay.offer(from, to, arc) {
                    shortcuts_added += 1;
                }
            }

            let mut neighbours: Vec<NodeId> = overlay
                .incoming(node)
                .into_iter()
                .chain(overlay.outgoing(node))
                .map(|(n, _)| n)
                .collect();
            neighbours.sort_unstable();
            neighbours.dedup();
            for n in neighbours {
                contracted_neighbours[n as usize] += 1;
            }

            overlay.contracted[node as usize] = true;
            rank[node as usize] = next_rank;
            next_rank += 1;

            if next_rank % 100_000 == 0 {
                debug!(contracted = next_rank, shortcuts = shortcuts_added, "progress");
            }
        }

        let edges = emit(&overlay, &rank);
        info!(
            shortcuts = shortcuts_added,
            edges = edges.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "contraction finished"
        );
        Ok(edges)
    }
}

/// Store each arc at its lower-ranked endpoint, merging an arc and its exact
/// reverse into one bidirectional record
fn emit(overlay: &Overlay, rank: &[u32]) -> Vec<HierarchyEdge> {
    let mut records: Vec<HierarchyEdge> = Vec::with_capacity(overlay.arc_count());
    for (from, arcs) in overlay.out.iter().enumerate() {
        let from = from as NodeId;
        for (&to, arc) in arcs {
            let (source, target, forward) = if rank[from as usize] < rank[to as usize] {
                (from, to, true)
            } else {
                (to, from, false)
            };
            records.push(HierarchyEdge {
                source,
                target,
                data: EdgeData {
                    distance: arc.weight,
                    turn: arc.turn,
                    forward,
                    backward: !forward,
                    payload: arc.payload,
                    kind: arc.kind,
                },
            });
        }
    }
    records.sort_unstable_by_key(|e| (e.source, e.target, e.data.backward));

    let mut merged: Vec<HierarchyEdge> = Vec::with_capacity(records.len());
    for edge in records {
        if let Some(last) = merged.last_mut() {
            if same_pair_other_direction(last, &edge) {
                last.data.backward = true;
                continue;
            }
        }
        merged.push(edge);
    }
    merged
}

fn same_pair_other_direction(a: &HierarchyEdge, b: &HierarchyEdge) -> bool {
    a.source == b.source
        && a.target == b.target
        && a.data.forward
        && !a.data.backward
        && b.data.backward
        && !b.data.forward
        && a.data.distance == b.data.distance
        && a.data.payload == b.data.payload
        && a.data.kind == b.data.kind
        && a.data.turn == b.data.turn
}

/// Every original edge must still be representable in the contracted graph:
/// each open direction of a non-loop edge needs a contracted record between
/// the same endpoints covering it with distance no greater than its weight.
pub fn check_original_edges(original: &[CanonicalEdge], contracted: &[HierarchyEdge]) -> Result<()> {
    // Best distance per directed pair (from, to)
    let mut best: FxHashMap<(NodeId, NodeId), i32> = FxHashMap::default();
    let mut note = |from: NodeId, to: NodeId, d: i32| {
        best.entry((from, to))
            .and_modify(|old| *old = (*old).min(d))
            .or_insert(d);
    };
    for edge in contracted {
        if edge.data.forward {
            note(edge.source, edge.target, edge.data.distance);
        }
        if edge.data.backward {
            note(edge.target, edge.source, edge.data.distance);
        }
    }

    for (i, edge) in original.iter().enumerate() {
        if edge.source == edge.target {
            continue;
        }
        let mut wanted = Vec::with_capacity(2);
        if edge.forward {
            wanted.push((edge.source, edge.target));
        }
        if edge.backward {
            wanted.push((edge.target, edge.source));
        }
        for (from, to) in wanted {
            match best.get(&(from, to)) {
                Some(&d) if d <= edge.weight => {}
                Some(&d) => {
                    return Err(Error::invariant(format!(
                        "original edge {i} ({from} -> {to}, weight {}) only covered at distance {d}",
                        edge.weight
                    )))
                }
                None => {
                    return Err(Error::invariant(format!(
                        "original edge {i} ({from} -> {to}) missing from contracted graph"
                    )))
                }
            }
        }
    }
    Ok(())
}
