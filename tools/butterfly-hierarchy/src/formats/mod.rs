//! Input graph formats and the binary artifacts of a preprocessing run
//!
//! Input side: four loaders that decode a raw graph into a coordinate table
//! plus [`CanonicalEdge`](crate::graph::CanonicalEdge) list. Output side: the
//! node table (`.nodes`) and hierarchy (`.hsgr`) codecs.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use butterfly_common::{Error, Result};
use tracing::debug;

use crate::graph::{Direction, LoadedGraph, NodeId, NodeRecord};
use crate::remap::IdRemap;

pub mod crc;
pub mod tokens;

// Input formats
pub mod ddsg;
pub mod osrm_binary;
pub mod osrm_text;
pub mod speed_class;

// Output formats
pub mod hsgr;
pub mod nodes;

pub use ddsg::DdsgGraph;
pub use hsgr::{EdgeData, EdgePayload, Hierarchy, HierarchyEdge, HsgrLayout};

/// Supported input graph formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Whitespace separated OSRM interchange text
    OsrmText,
    /// Fixed-width OSRM interchange binary
    OsrmBinary,
    /// Text with speed classes instead of weights (DTMP)
    SpeedClass,
    /// Edge-only text with lazily discovered nodes (DDSG)
    Ddsg,
}

impl InputFormat {
    /// What a loader does when an edge names a node that was never declared
    pub fn unresolved_policy(self) -> UnresolvedPolicy {
        match self {
            InputFormat::OsrmBinary => UnresolvedPolicy::Skip,
            InputFormat::OsrmText | InputFormat::SpeedClass | InputFormat::Ddsg => {
                UnresolvedPolicy::Abort
            }
        }
    }

    pub fn has_coordinates(self) -> bool {
        !matches!(self, InputFormat::Ddsg)
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputFormat::OsrmText => "osrm-text",
            InputFormat::OsrmBinary => "osrm-binary",
            InputFormat::SpeedClass => "speed-class",
            InputFormat::Ddsg => "ddsg",
        };
        f.write_str(name)
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "osrm-text" | "osrm" | "text" => Ok(InputFormat::OsrmText),
            "osrm-binary" | "binary" => Ok(InputFormat::OsrmBinary),
            "speed-class" | "dtmp" => Ok(InputFormat::SpeedClass),
            "ddsg" => Ok(InputFormat::Ddsg),
            other => Err(format!(
                "unknown input format '{other}' (expected osrm-text, osrm-binary, speed-class or ddsg)"
            )),
        }
    }
}

/// Handling of edges whose endpoints cannot be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Fail the whole load
    Abort,
    /// Drop the edge and keep going
    Skip,
}

/// Counters collected while loading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub declared_nodes: u64,
    pub declared_edges: u64,
    pub skipped_edges: u64,
}

/// A loaded graph together with its load counters
#[derive(Debug)]
pub struct Loaded {
    pub graph: LoadedGraph,
    pub report: LoadReport,
}

/// Raw edge as it appeared in the input, kept for diagnostics
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawEdge {
    pub source: u32,
    pub target: u32,
    pub length: i32,
    pub direction: i32,
    pub weight: i32,
}

impl fmt::Display for RawEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.source, self.target, self.length, self.direction, self.weight
        )
    }
}

/// Largest number of records reserved up front from a count declared in the input
pub(crate) const MAX_RESERVED_RECORDS: usize = 1 << 20;

/// Capacity to reserve for a declared record count. The count is not trusted:
/// containers grow past the cap as records actually arrive.
pub(crate) fn reserve_hint(declared: u32) -> usize {
    (declared as usize).min(MAX_RESERVED_RECORDS)
}

/// Append a declared node, rejecting the sentinel and duplicate identifiers
pub(crate) fn declare_node(
    remap: &mut IdRemap,
    nodes: &mut Vec<NodeRecord>,
    node: NodeRecord,
) -> Result<()> {
    let expected = nodes.len() as NodeId;
    match remap.insert_if_absent(node.external_id) {
        Some(id) if id == expected => {
            nodes.push(node);
            Ok(())
        }
        Some(_) => Err(Error::malformed(
            format!("node {}", node.external_id),
            "duplicate node identifier",
        )),
        None => Err(Error::malformed(
            format!("node {}", node.external_id),
            "reserved node identifier",
        )),
    }
}

/// Map both endpoints of `raw` to internal indices according to `policy`.
///
/// `Ok(None)` means the edge was dropped under [`UnresolvedPolicy::Skip`].
pub(crate) fn resolve_endpoints(
    remap: &IdRemap,
    policy: UnresolvedPolicy,
    raw: &RawEdge,
    edges_processed: usize,
) -> Result<Option<(NodeId, NodeId)>> {
    let lookup = |id: u32| {
        remap.resolve(id).ok_or_else(|| Error::UnresolvedIdentifier {
            id,
            edges_processed,
            record: raw.to_string(),
        })
    };
    match (lookup(raw.source), lookup(raw.target)) {
        (Ok(s), Ok(t)) => Ok(Some((s, t))),
        (Err(e), _) | (_, Err(e)) => match policy {
            UnresolvedPolicy::Abort => Err(e),
            UnresolvedPolicy::Skip => {
                debug!(record = %raw, "skipping edge with unresolved endpoint");
                Ok(None)
            }
        },
    }
}

/// Shared field checks of the interchange formats, yielding the decoded direction
pub(crate) fn validate_raw(raw: &RawEdge) -> Result<Direction> {
    if raw.length <= 0 {
        return Err(Error::malformed(raw.to_string(), "length must be positive"));
    }
    if raw.weight <= 0 {
        return Err(Error::malformed(raw.to_string(), "weight must be positive"));
    }
    Direction::from_code(raw.direction).ok_or_else(|| {
        Error::malformed(
            raw.to_string(),
            format!("direction {} out of range", raw.direction),
        )
    })
}

/// Fill `buf` completely, or report a clean end of input.
///
/// Returns `Ok(false)` when the stream ended before any byte was read and a
/// truncation error when it ended part way through.
pub(crate) fn read_record<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(Error::malformed(
                    what.to_string(),
                    format!("truncated record ({} of {} bytes)", filled, buf.len()),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Like [`read_record`] but a clean end of input is an error too
pub(crate) fn read_exact_record<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    if read_record(reader, buf, what)? {
        Ok(())
    } else {
        Err(Error::malformed(what.to_string(), "unexpected end of input"))
    }
}

/// Load a graph with coordinates from `path`
pub fn load_path(format: InputFormat, path: &Path) -> Result<Loaded> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let reader = BufReader::new(file);
    match format {
        InputFormat::OsrmText => osrm_text::read(reader),
        InputFormat::OsrmBinary => osrm_binary::read(reader),
        InputFormat::SpeedClass => speed_class::read(reader),
        InputFormat::Ddsg => Err(Error::invariant(
            "ddsg input carries no coordinates; load it with formats::ddsg::read",
        )),
    }
}
