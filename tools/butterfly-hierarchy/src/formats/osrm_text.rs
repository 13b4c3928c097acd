//! OSRM text interchange format
//!
//! ```text
//! <n>
//! <id> <lat> <lon>                                     (n lines)
//! <m>
//! <source> <target> <length> <dir> <weight> <type> <name>   (m lines)
//! ```
//!
//! Direction codes are 0 (open), 1 (forward only) and 2 (backward only). An
//! edge naming an undeclared node aborts the load.

use std::io::BufRead;
use std::time::Instant;

use butterfly_common::Result;
use tracing::info;

use super::tokens::Tokens;
use super::{
    declare_node, reserve_hint, resolve_endpoints, validate_raw, InputFormat, LoadReport, Loaded,
    RawEdge,
};
use crate::graph::{compact, CanonicalEdge, LoadedGraph, NodeRecord};
use crate::remap::IdRemap;

pub fn read<R: BufRead>(reader: R) -> Result<Loaded> {
    let start = Instant::now();
    let policy = InputFormat::OsrmText.unresolved_policy();
    let mut tokens = Tokens::new(reader);

    let n: u32 = tokens.parse("node count")?;
    info!(nodes = n, "importing OSRM text graph");

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
        let raw = RawEdge {
            source: tokens.parse("edge source")?,
            target: tokens.parse("edge target")?,
            length: tokens.parse("edge length")?,
            direction: tokens.parse("edge direction")?,
            weight: tokens.parse("edge weight")?,
        };
        let kind: i16 = tokens.parse("edge type")?;
        let name_id: u32 = tokens.parse("edge name id")?;

        let direction = validate_raw(&raw)?;
        let Some((source, target)) = resolve_endpoints(&remap, policy, &raw, edges.len())? else {
            skipped += 1;
            continue;
        };
        edges.push(CanonicalEdge::new(
            source, target, name_id, raw.weight, direction, kind,
        ));
    }
    compact(&mut edges);

    info!(
        nodes = nodes.len(),
        edges = edges.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "OSRM text graph loaded"
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
