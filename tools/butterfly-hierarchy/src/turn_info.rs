//! Turn information derivation
//!
//! Runs once on the loaded edge list, before the spatial index is built. The
//! flags it produces travel with each edge untouched until the hierarchy
//! writer copies them to disk.

use rustc_hash::FxHashSet;

use butterfly_common::{Error, Result};

use crate::graph::{CanonicalEdge, TurnFlags};

/// Produces one [`TurnFlags`] per input edge, in edge order
pub trait TurnInfoDeriver {
    fn derive(&self, node_count: usize, edges: &[CanonicalEdge]) -> Result<Vec<TurnFlags>>;
}

/// Flags edges that end or start at a junction.
///
/// A junction is a node with more than two distinct neighbours. An edge gets
/// `forward` when its target is a junction and `backward` when its source is.
#[derive(Debug, Default, Clone, Copy)]
pub struct JunctionTurnInfo;

impl TurnInfoDeriver for JunctionTurnInfo {
    fn derive(&self, node_count: usize, edges: &[CanonicalEdge]) -> Result<Vec<TurnFlags>> {
        let mut neighbours: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); node_count];
        for edge in edges {
            let (s, t) = (edge.source as usize, edge.target as usize);
            if s >= node_count || t >= node_count {
                return Err(Error::invariant(format!(
                    "edge {} -> {} outside of {} nodes",
                    edge.source, edge.target, node_count
                )));
            }
            if s == t {
                continue;
            }
            neighbours[s].insert(edge.target);
            neighbours[t].insert(edge.source);
        }

        let is_junction = |n: u32| neighbours[n as usize].len() > 2;
        Ok(edges
            .iter()
            .map(|edge| TurnFlags {
                forward: is_junction(edge.target),
                backward: is_junction(edge.source),
            })
            .collect())
    }
}

/// Attach derived flags to a fresh copy of the edge list
pub fn apply(edges: Vec<CanonicalEdge>, flags: &[TurnFlags]) -> Result<Vec<CanonicalEdge>> {
    if edges.len() != flags.len() {
        return Err(Error::invariant(format!(
            "turn info produced {} flags for {} edges",
            flags.len(),
            edges.len()
        )));
    }
    Ok(edges
        .into_iter()
        .zip(flags)
        .map(|(edge, &turn)| CanonicalEdge { turn, ..edge })
        .collect())
}
