//! Post-contraction cleanup
//!
//! Contraction can leave several records for the same endpoint pair (an
//! original edge next to a cheaper shortcut, or one record per direction).
//! The cleanup keeps one winner per direction and never emits a self-loop.

use butterfly_common::Result;
use tracing::debug;

use crate::formats::{EdgeData, HierarchyEdge};

pub trait Cleanup: Send + Sync {
    fn clean(&self, edges: Vec<HierarchyEdge>) -> Result<Vec<HierarchyEdge>>;
}

/// Drops self-loops and duplicate records, output sorted by `(source, target)`
#[derive(Debug, Default, Clone, Copy)]
pub struct DedupCleanup;

/// Equal apart from the direction flags
fn same_payload(a: &EdgeData, b: &EdgeData) -> bool {
    a.distance == b.distance && a.payload == b.payload && a.kind == b.kind && a.turn == b.turn
}

/// Shortest record open in the direction selected by `open`; ties go to the first
fn shortest<'a>(
    group: &'a [HierarchyEdge],
    open: impl Fn(&EdgeData) -> bool,
) -> Option<(usize, &'a HierarchyEdge)> {
    group
        .iter()
        .enumerate()
        .filter(|(_, e)| open(&e.data))
        .min_by_key(|(i, e)| (e.data.distance, *i))
}

fn reduce(group: &[HierarchyEdge], out: &mut Vec<HierarchyEdge>) {
    let forward = shortest(group, |d| d.forward);
    let backward = shortest(group, |d| d.backward);

    match (forward, backward) {
        (Some((i, f)), Some((j, _))) if i == j => out.push(*f),
        (Some((_, f)), Some((_, b))) if same_payload(&f.data, &b.data) => {
            let mut merged = *f;
            merged.data.forward = true;
            merged.data.backward = true;
            out.push(merged);
        }
        (f, b) => {
            if let Some((_, f)) = f {
                let mut only = *f;
                only.data.backward = false;
                out.push(only);
            }
            if let Some((_, b)) = b {
                let mut only = *b;
                only.data.forward = false;
                out.push(only);
            }
        }
    }
}

impl Cleanup for DedupCleanup {
    fn clean(&self, mut edges: Vec<HierarchyEdge>) -> Result<Vec<HierarchyEdge>> {
        let before = edges.len();
        edges.retain(|e| e.source != e.target && (e.data.forward || e.data.backward));
        let loops = before - edges.len();
        edges.sort_by_key(|e| (e.source, e.target));

        let mut out = Vec::with_capacity(edges.len());
        for group in edges.chunk_by(|a, b| (a.source, a.target) == (b.source, b.target)) {
            reduce(group, &mut out);
        }

        debug!(
            before,
            after = out.len(),
            dropped_loops = loops,
            "hierarchy edges cleaned"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::EdgePayload;
    use crate::graph::TurnFlags;

    fn record(source: u32, target: u32, distance: i32, fwd: bool, bwd: bool) -> HierarchyEdge {
        HierarchyEdge {
            source,
            target,
            data: EdgeData {
                distance,
                turn: TurnFlags::default(),
                forward: fwd,
                backward: bwd,
                payload: EdgePayload::Original { name: 0 },
                kind: 1,
            },
        }
    }

    #[test]
    fn test_drops_self_loops() {
        let out = DedupCleanup
            .clean(vec![record(3, 3, 5, true, true), record(1, 2, 5, true, false)])
            .unwrap();
        assert_eq!(out, vec![record(1, 2, 5, true, false)]);
    }

    #[test]
    fn test_keeps_shortest_per_direction() {
        let out = DedupCleanup
            .clean(vec![
                record(0, 1, 9, true, true),
                record(0, 1, 4, true, false),
            ])
            .unwrap();
        assert_eq!(
            out,
            vec![record(0, 1, 4, true, false), record(0, 1, 9, false, true)]
        );
    }

    #[test]
    fn test_merges_matching_directions() {
        let out = DedupCleanup
            .clean(vec![
                record(0, 1, 4, false, true),
                record(0, 1, 4, true, false),
            ])
            .unwrap();
        assert_eq!(out, vec![record(0, 1, 4, true, true)]);
    }

    #[test]
    fn test_different_payloads_stay_apart() {
        let mut shortcut = record(0, 1, 4, false, true);
        shortcut.data.payload = EdgePayload::Shortcut { middle: 7 };
        let out = DedupCleanup
            .clean(vec![record(0, 1, 4, true, false), shortcut])
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_sorted_and_idempotent() {
        let input = vec![
            record(2, 0, 3, true, false),
            record(0, 2, 3, true, true),
            record(0, 1, 8, false, true),
            record(0, 1, 2, false, true),
        ];
        let once = DedupCleanup.clean(input).unwrap();
        assert!(once
            .windows(2)
            .all(|w| (w[0].source, w[0].target) <= (w[1].source, w[1].target)));
        assert_eq!(once.len(), 3);
        assert_eq!(DedupCleanup.clean(once.clone()).unwrap(), once);
    }
}
