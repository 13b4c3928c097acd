//! Speed-class graph format (DTMP)
//!
//! Node section as in the OSRM text format; edges are
//! `<source> <target> <length> <dir> <class>` where the class selects a
//! representative speed and the weight is derived from it. Direction code 3
//! is an alias for 0.

use std::io::BufRead;
use std::time::Instant;

use butterfly_common::{Error, Result};
use tracing::info;

use super::tokens::Tokens;
use super::{
    declare_node, reserve_hint, resolve_endpoints, validate_raw, InputFormat, LoadReport, Loaded,
    RawEdge,
};
use crate::graph::{compact, CanonicalEdge, LoadedGraph, NodeRecord};
use crate::remap::IdRemap;

/// How a speed class turns a length into a weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedRule {
    /// Representative speed in km/h
    Kmh(i32),
    /// The length field already holds a cost
    LengthIsCost,
}

/// Speed rule of a class code. Unknown codes (including 14) travel at 0 km/h.
pub fn speed_rule(class: u32) -> SpeedRule {
    match class {
        1 => SpeedRule::Kmh(130),
        2 => SpeedRule::Kmh(120),
        3 => SpeedRule::Kmh(110),
        4 => SpeedRule::Kmh(100),
        5 => SpeedRule::Kmh(90),
        6 => SpeedRule::Kmh(80),
        7 => SpeedRule::Kmh(70),
        8 => SpeedRule::Kmh(60),
        9 => SpeedRule::Kmh(50),
        10 => SpeedRule::Kmh(40),
        11 => SpeedRule::Kmh(30),
        12 => SpeedRule::Kmh(20),
        13 => SpeedRule::LengthIsCost,
        15 => SpeedRule::Kmh(10),
        _ => SpeedRule::Kmh(0),
    }
}

/// Weight of an edge of `length` in speed class `class`: `floor(length * kmh / 3.6)`.
///
/// `None` when the weight does not fit in an `i32`.
pub fn weight_for(length: i32, class: u32) -> Option<i32> {
    match speed_rule(class) {
        SpeedRule::LengthIsCost => Some(length),
        SpeedRule::Kmh(kmh) => {
            let weight = ((length as i64 * kmh as i64) as f64 / 3.6).floor() as i64;
            i32::try_from(weight).ok()
        }
    }
}

pub fn read<R: BufRead>(reader: R) -> Result<Loaded> {
    let start = Instant::now();
    let policy = InputFormat::SpeedClass.unresolved_policy();
    let mut tokens = Tokens::new(reader);

    let n: u32 = tokens.parse("node count")?;
    info!(nodes = n, "importing speed-class graph");

    let mut remap = IdRemap::with_capacity(reserve_hint(n));
    let mut nodes = Vec::with_capacity(reserve_hint(n));
    for _ in 0..n {
        let id: u32 = tokens.parse("node id")?;
        let lat: i32 = tokens.parse("latitude")?;
        let lon: i32 = tokens.parse("longitude")?;
        declare_node(&mut remap, &mut nodes, NodeRecord::new(id, lat, lon))?;
    }

    let m: u32 = tokens.parse("edge count")?;
    info!(edges = m, "reading edges");

    let mut edges = Vec::with_capacity(reserve_hint(m));
    let mut skipped = 0u64;
    for _ in 0..m {
        let source: u32 = tokens.parse("edge source")?;
        let target: u32 = tokens.parse("edge target")?;
        let length: i32 = tokens.parse("edge length")?;
        let mut direction: i32 = tokens.parse("edge direction")?;
        let class: u32 = tokens.parse("speed class")?;

        if direction == 3 {
            direction = 0;
        }
        let weight = weight_for(length, class).ok_or_else(|| {
            Error::malformed(
                format!("{source},{target},{length},{direction},{class}"),
                "weight overflows i32",
            )
        })?;
        let raw = RawEdge {
            source,
            target,
            length,
            direction,
            weight,
        };

        let direction = validate_raw(&raw)?;
        let Some((source, target)) = resolve_endpoints(&remap, policy, &raw, edges.len())? else {
            skipped += 1;
            continue;
        };
        edges.push(CanonicalEdge::new(source, target, 0, raw.weight, direction, 0));
    }
    compact(&mut edges);

    info!(
        nodes = nodes.len(),
        edges = edges.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "speed-class graph loaded"
    );

    Ok(Loaded {
        graph: LoadedGraph { nodes, edges },
        report: LoadReport {
            declared_nodes: n as u64,
            declared_edges: m as u64,
            skipped_edges: skipped,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_common::{Error, ErrorKind};

    #[test]
    fn test_weight_formula() {
        assert_eq!(weight_for(100, 10), Some(1111));
        assert_eq!(weight_for(50, 13), Some(50));
        assert_eq!(weight_for(36, 1), Some(1300));
        assert_eq!(weight_for(1000, 15), Some(2777));
    }

    #[test]
    fn test_unknown_classes_have_no_speed() {
        assert_eq!(speed_rule(14), SpeedRule::Kmh(0));
        assert_eq!(speed_rule(0), SpeedRule::Kmh(0));
        assert_eq!(speed_rule(99), SpeedRule::Kmh(0));
        assert_eq!(weight_for(100, 14), Some(0));
    }

    #[test]
    fn test_read_speed_class_graph() {
        let input = "\
2
7 100 200
9 300 400
4
7 9 100 0 10
9 7 50 3 13
7 9 10 2 1
9 7 100 1 9
";
        let graph = read(input.as_bytes()).unwrap().graph;
        assert_eq!(graph.edges.len(), 4);

        let e = graph.edges[0];
        assert_eq!((e.source, e.target, e.weight, e.name_id, e.kind), (0, 1, 1111, 0, 0));
        assert!(e.forward && e.backward);

        let e = graph.edges[1];
        assert_eq!(e.weight, 50);
        assert!(e.forward && e.backward, "direction 3 reads as open");

        let e = graph.edges[2];
        assert_eq!(e.weight, 361);
        assert!(!e.forward && e.backward);

        let e = graph.edges[3];
        assert_eq!((e.source, e.target, e.weight), (1, 0, 1388));
        assert!(e.forward && !e.backward);
    }

    #[test]
    fn test_class_14_is_rejected() {
        let input = "2\n7 0 0\n9 0 0\n1\n7 9 100 0 14\n";
        let err = read(input.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_overflowing_weight_is_rejected() {
        assert_eq!(weight_for(2_000_000_000, 1), None);
        assert_eq!(weight_for(i32::MAX, 13), Some(i32::MAX));

        let input = "2\n7 0 0\n9 0 0\n1\n7 9 2000000000 0 1\n";
        let err = read(input.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_huge_declared_counts_are_not_trusted() {
        let err = read("4294967295\n7 0 0\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);

        let err = read("1\n7 0 0\n4294967295\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_unresolved_endpoint_aborts() {
        let input = "2\n7 0 0\n9 0 0\n1\n7 8 100 0 10\n";
        let err = read(input.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedIdentifier { id: 8, .. }));
    }
}
