//! OSRM binary interchange format
//!
//! Same logical content as the text format in fixed-width fields, host byte
//! order, no padding:
//!
//! ```text
//! n: u32
//! n x { id: u32, lat: i32, lon: i32 }                                  12 bytes
//! m: u32
//! m x { source: u32, target: u32, length: i32, dir: i16,
//!       weight: i32, type: i16, name: u32 }                            24 bytes
//! ```
//!
//! Unlike the text channel, an edge with an undeclared endpoint is dropped and
//! the load continues.

use std::io::{BufRead, Write};
use std::time::Instant;

use butterfly_common::Result;
use tracing::{info, warn};

use super::{
    declare_node, read_exact_record, reserve_hint, resolve_endpoints, validate_raw, InputFormat, LoadReport,
    Loaded, RawEdge,
};
use crate::graph::{compact, CanonicalEdge, LoadedGraph, NodeRecord};
use crate::remap::IdRemap;

const NODE_RECORD_LEN: usize = 12;
const EDGE_RECORD_LEN: usize = 24;

/// An edge in external identifiers, as stored in the binary channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterchangeEdge {
    pub source: u32,
    pub target: u32,
    pub length: i32,
    pub direction: i16,
    pub weight: i32,
    pub kind: i16,
    pub name_id: u32,
}

impl InterchangeEdge {
    fn to_bytes(self) -> [u8; EDGE_RECORD_LEN] {
        let mut buf = [0u8; EDGE_RECORD_LEN];
        buf[0..4].copy_from_slice(&self.source.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.target.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.length.to_ne_bytes());
        buf[12..14].copy_from_slice(&self.direction.to_ne_bytes());
        buf[14..18].copy_from_slice(&self.weight.to_ne_bytes());
        buf[18..20].copy_from_slice(&self.kind.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.name_id.to_ne_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; EDGE_RECORD_LEN]) -> Self {
        Self {
            source: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            target: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: i32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]),
            direction: i16::from_ne_bytes([buf[12], buf[13]]),
            weight: i32::from_ne_bytes([buf[14], buf[15], buf[16], buf[17]]),
            kind: i16::from_ne_bytes([buf[18], buf[19]]),
            name_id: u32::from_ne_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }
}

fn read_u32<R: BufRead>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_record(reader, &mut buf, what)?;
    Ok(u32::from_ne_bytes(buf))
}

pub fn read<R: BufRead>(mut reader: R) -> Result<Loaded> {
    let start = Instant::now();
    let policy = InputFormat::OsrmBinary.unresolved_policy();

    let n = read_u32(&mut reader, "node count")?;
    info!(nodes = n, "importing OSRM binary graph");

    let mut remap = IdRemap::with_capacity(reserve_hint(n));
    let mut nodes = Vec::with_capacity(reserve_hint(n));
    let mut buf = [0u8; NODE_RECORD_LEN];
    for i in 0..n {
        read_exact_record(&mut reader, &mut buf, &format!("node {i}"))?;
        let id = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let lat = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let lon = i32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]);
        declare_node(&mut remap, &mut nodes, NodeRecord::new(id, lat, lon))?;
    }

    let m = read_u32(&mut reader, "edge count")?;
    info!(edges = m, "reading edges");

    let mut edges = Vec::with_capacity(reserve_hint(m));
    let mut skipped = 0u64;
    let mut buf = [0u8; EDGE_RECORD_LEN];
    for i in 0..m {
        read_exact_record(&mut reader, &mut buf, &format!("edge {i}"))?;
        let record = InterchangeEdge::from_bytes(&buf);
        let raw = RawEdge {
            source: record.source,
            target: record.target,
            length: record.length,
            direction: record.direction as i32,
            weight: record.weight,
        };

        let direction = validate_raw(&raw)?;
        let Some((source, target)) = resolve_endpoints(&remap, policy, &raw, edges.len())? else {
            skipped += 1;
            continue;
        };
        edges.push(CanonicalEdge::new(
            source,
            target,
            record.name_id,
            record.weight,
            direction,
            record.kind,
        ));
    }
    compact(&mut edges);

    if skipped > 0 {
        warn!(skipped, "dropped edges with unresolved endpoints");
    }
    info!(
        nodes = nodes.len(),
        edges = edges.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "OSRM binary graph loaded"
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

/// Encode nodes and edges in the binary interchange layout
pub fn write<W: Write>(writer: &mut W, nodes: &[NodeRecord], edges: &[InterchangeEdge]) -> Result<()> {
    writer.write_all(&(nodes.len() as u32).to_ne_bytes())?;
    for node in nodes {
        writer.write_all(&node.external_id.to_ne_bytes())?;
        writer.write_all(&node.lat.to_ne_bytes())?;
        writer.write_all(&node.lon.to_ne_bytes())?;
    }
    writer.write_all(&(edges.len() as u32).to_ne_bytes())?;
    for edge in edges {
        writer.write_all(&edge.to_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_common::ErrorKind;

    fn edge(source: u32, target: u32, direction: i16, weight: i32) -> InterchangeEdge {
        InterchangeEdge {
            source,
            target,
            length: 10,
            direction,
            weight,
            kind: 2,
            name_id: 40,
        }
    }

    fn encode(nodes: &[NodeRecord], edges: &[InterchangeEdge]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write(&mut bytes, nodes, edges).unwrap();
        bytes
    }

    fn sample_nodes() -> Vec<NodeRecord> {
        vec![
            NodeRecord::new(10, 100, 200),
            NodeRecord::new(20, 110, 210),
            NodeRecord::new(30, 120, 220),
        ]
    }

    #[test]
    fn test_record_sizes() {
        let bytes = encode(&sample_nodes(), &[edge(10, 20, 0, 5)]);
        assert_eq!(bytes.len(), 4 + 3 * NODE_RECORD_LEN + 4 + EDGE_RECORD_LEN);
    }

    #[test]
    fn test_read_binary_graph() {
        let edges = [edge(10, 20, 0, 5), edge(20, 30, 1, 6), edge(30, 10, 2, 7)];
        let loaded = read(encode(&sample_nodes(), &edges).as_slice()).unwrap();
        let graph = loaded.graph;

        assert_eq!(graph.nodes, sample_nodes());
        let summary: Vec<_> = graph
            .edges
            .iter()
            .map(|e| (e.source, e.target, e.weight, e.forward, e.backward, e.name_id, e.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, 1, 5, true, true, 40, 2),
                (1, 2, 6, true, false, 40, 2),
                (2, 0, 7, false, true, 40, 2),
            ]
        );
    }

    #[test]
    fn test_unresolved_endpoint_is_skipped() {
        let edges = [edge(10, 20, 0, 5), edge(10, 99, 0, 6), edge(77, 30, 0, 7), edge(20, 30, 0, 8)];
        let loaded = read(encode(&sample_nodes(), &edges).as_slice()).unwrap();

        assert_eq!(loaded.report.skipped_edges, 2);
        assert_eq!(loaded.report.declared_edges, 4);
        let weights: Vec<i32> = loaded.graph.edges.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![5, 8]);
    }

    #[test]
    fn test_malformed_edge_is_fatal() {
        let edges = [edge(10, 20, 0, 0)];
        let err = read(encode(&sample_nodes(), &edges).as_slice()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);

        let edges = [edge(10, 20, 3, 5)];
        let err = read(encode(&sample_nodes(), &edges).as_slice()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_huge_declared_counts_are_not_trusted() {
        let err = read(&u32::MAX.to_ne_bytes()[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);

        let mut bytes = encode(&sample_nodes(), &[]);
        let at = bytes.len() - 4;
        bytes[at..].copy_from_slice(&u32::MAX.to_ne_bytes());
        let err = read(bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode(&sample_nodes(), &[edge(10, 20, 0, 5)]);
        let err = read(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }
}
