//! DDSG graph format - edges only, nodes discovered on first reference
//!
//! ```text
//! d
//! <n> <m>
//! <source> <target> <weight> <dir>      (m lines)
//! ```
//!
//! Direction 3 is explicitly bidirectional here. Edges keep the identifiers
//! exactly as they appear in the file; the discovery order is returned
//! separately so callers can build their own mapping.

use std::io::BufRead;

use butterfly_common::{Error, Result};
use tracing::info;

use super::tokens::Tokens;
use super::{reserve_hint, RawEdge};
use crate::graph::{compact, CanonicalEdge, Direction};
use crate::remap::IdRemap;

/// Edge type assigned to every DDSG edge
pub const DDSG_EDGE_TYPE: i16 = 1;

#[derive(Debug)]
pub struct DdsgGraph {
    /// Number of distinct nodes referenced by the edges
    pub node_count: usize,
    /// External identifiers in discovery order
    pub external_ids: Vec<u32>,
    /// Edges in the file's own identifiers
    pub edges: Vec<CanonicalEdge>,
}

fn decode_direction(code: i32) -> Option<Direction> {
    match code {
        3 => Some(Direction::Both),
        other => Direction::from_code(other),
    }
}

pub fn read<R: BufRead>(reader: R) -> Result<DdsgGraph> {
    let mut tokens = Tokens::new(reader);

    let _marker = tokens
        .token()?
        .ok_or_else(|| Error::malformed("header", "empty input"))?;
    let n: u32 = tokens.parse("node count")?;
    let m: u32 = tokens.parse("edge count")?;
    info!(nodes = n, edges = m, "importing DDSG graph");

    let mut remap = IdRemap::with_capacity(reserve_hint(n));
    let mut edges = Vec::with_capacity(reserve_hint(m));
    for _ in 0..m {
        let raw = RawEdge {
            source: tokens.parse("edge source")?,
            target: tokens.parse("edge target")?,
            weight: tokens.parse("edge weight")?,
            direction: tokens.parse("edge direction")?,
            length: 0,
        };

        if raw.weight <= 0 {
            return Err(Error::malformed(raw.to_string(), "weight must be positive"));
        }
        let direction = decode_direction(raw.direction).ok_or_else(|| {
            Error::malformed(
                raw.to_string(),
                format!("direction {} out of range", raw.direction),
            )
        })?;
        for id in [raw.source, raw.target] {
            if remap.insert_if_absent(id).is_none() {
                return Err(Error::malformed(raw.to_string(), "reserved node identifier"));
            }
        }

        edges.push(CanonicalEdge::new(
            raw.source,
            raw.target,
            0,
            raw.weight,
            direction,
            DDSG_EDGE_TYPE,
        ));
    }
    compact(&mut edges);

    info!(nodes = remap.len(), edges = edges.len(), "DDSG graph loaded");

    Ok(DdsgGraph {
        node_count: remap.len(),
        external_ids: remap.into_external_ids(),
        edges,
    })
}
