//! .hsgr format - contracted hierarchy edge list
//!
//! A headerless sequence of packed fixed-width records in host byte order.
//! Two layouts exist:
//!
//! | field            | current | legacy |
//! |------------------|---------|--------|
//! | distance: i32    | x       | x      |
//! | forward_turn: u8 | x       |        |
//! | backward_turn: u8| x       |        |
//! | shortcut: u8     | x       | x      |
//! | forward: u8      | x       | x      |
//! | backward: u8     | x       | x      |
//! | middle_or_name: u32 | x    | x      |
//! | type: i16        | x       | x      |
//! | source: u32      | x       | x      |
//! | target: u32      | x       | x      |
//!
//! `middle_or_name` is the contracted middle node when `shortcut` is set and
//! the name id of the original edge otherwise. [`EdgePayload`] is the only
//! place that packing happens.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use butterfly_common::{Error, Result};

use super::read_record;
use crate::graph::{NodeId, TurnFlags};

/// What the `middle_or_name` field of a record means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePayload {
    /// An input edge and its name id
    Original { name: u32 },
    /// A shortcut through the contracted node `middle`
    Shortcut { middle: NodeId },
}

impl EdgePayload {
    /// `(shortcut, middle_or_name)` as stored on disk
    pub fn pack(self) -> (bool, u32) {
        match self {
            EdgePayload::Original { name } => (false, name),
            EdgePayload::Shortcut { middle } => (true, middle),
        }
    }

    pub fn unpack(shortcut: bool, value: u32) -> Self {
        if shortcut {
            EdgePayload::Shortcut { middle: value }
        } else {
            EdgePayload::Original { name: value }
        }
    }

    pub fn is_shortcut(self) -> bool {
        matches!(self, EdgePayload::Shortcut { .. })
    }

    pub fn middle(self) -> Option<NodeId> {
        match self {
            EdgePayload::Shortcut { middle } => Some(middle),
            EdgePayload::Original { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeData {
    pub distance: i32,
    pub turn: TurnFlags,
    pub forward: bool,
    pub backward: bool,
    pub payload: EdgePayload,
    pub kind: i16,
}

/// One edge of the contracted graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub data: EdgeData,
}

impl HierarchyEdge {
    /// Largest node index this record refers to
    pub fn max_node(&self) -> NodeId {
        let ends = self.source.max(self.target);
        match self.data.payload.middle() {
            Some(middle) => ends.max(middle),
            None => ends,
        }
    }
}

/// On-disk record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HsgrLayout {
    /// With the two turn flags after `distance`; what the writer emits
    #[default]
    Current,
    /// Older files without turn flags
    Legacy,
}

impl HsgrLayout {
    pub fn record_len(self) -> usize {
        match self {
            HsgrLayout::Current => 23,
            HsgrLayout::Legacy => 21,
        }
    }

    fn encode(self, edge: &HierarchyEdge, buf: &mut Vec<u8>) {
        let data = &edge.data;
        let (shortcut, middle_or_name) = data.payload.pack();
        buf.clear();
        buf.extend_from_slice(&data.distance.to_ne_bytes());
        if self == HsgrLayout::Current {
            buf.push(data.turn.forward as u8);
            buf.push(data.turn.backward as u8);
        }
        buf.push(shortcut as u8);
        buf.push(data.forward as u8);
        buf.push(data.backward as u8);
        buf.extend_from_slice(&middle_or_name.to_ne_bytes());
        buf.extend_from_slice(&data.kind.to_ne_bytes());
        buf.extend_from_slice(&edge.source.to_ne_bytes());
        buf.extend_from_slice(&edge.target.to_ne_bytes());
    }

    fn decode(self, buf: &[u8], index: usize) -> Result<HierarchyEdge> {
        let flag = |at: usize, name: &str| -> Result<bool> {
            match buf[at] {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(Error::malformed(
                    format!("hierarchy record {index}"),
                    format!("{name} flag byte is {other}"),
                )),
            }
        };
        let u32_at = |at: usize| u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        let distance = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if distance <= 0 {
            return Err(Error::malformed(
                format!("hierarchy record {index}"),
                format!("distance {distance} is not positive"),
            ));
        }

        let (turn, at) = match self {
            HsgrLayout::Current => (
                TurnFlags {
                    forward: flag(4, "forward turn")?,
                    backward: flag(5, "backward turn")?,
                },
                6,
            ),
            HsgrLayout::Legacy => (TurnFlags::default(), 4),
        };
        let shortcut = flag(at, "shortcut")?;
        let forward = flag(at + 1, "forward")?;
        let backward = flag(at + 2, "backward")?;
        let middle_or_name = u32_at(at + 3);
        let kind = i16::from_ne_bytes([buf[at + 7], buf[at + 8]]);
        let source = u32_at(at + 9);
        let target = u32_at(at + 13);

        Ok(HierarchyEdge {
            source,
            target,
            data: EdgeData {
                distance,
                turn,
                forward,
                backward,
                payload: EdgePayload::unpack(shortcut, middle_or_name),
                kind,
            },
        })
    }
}

/// A hierarchy read back from disk
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Hierarchy {
    /// `1 + max(source, target, middle of shortcuts)`, 0 when empty
    pub node_count: usize,
    pub edges: Vec<HierarchyEdge>,
}

/// Write `edges` in the current layout, returning the number of records
pub fn write_to<W: Write>(writer: &mut W, edges: &[HierarchyEdge]) -> Result<u64> {
    let layout = HsgrLayout::Current;
    let mut buf = Vec::with_capacity(layout.record_len());
    for edge in edges {
        if edge.data.distance <= 0 {
            return Err(Error::invariant(format!(
                "hierarchy edge {} -> {} has non-positive distance {}",
                edge.source, edge.target, edge.data.distance
            )));
        }
        layout.encode(edge, &mut buf);
        writer.write_all(&buf)?;
    }
    writer.flush()?;
    Ok(edges.len() as u64)
}

pub fn write<P: AsRef<Path>>(path: P, edges: &[HierarchyEdge]) -> Result<u64> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
    let mut writer = BufWriter::new(file);
    write_to(&mut writer, edges).map_err(|e| match e {
        Error::Io { path: None, source } => Error::io_at(path, source),
        other => other,
    })
}

/// Read records until the end of input
pub fn read_from<R: Read>(reader: &mut R, layout: HsgrLayout) -> Result<Hierarchy> {
    let mut buf = vec![0u8; layout.record_len()];
    let mut edges = Vec::new();
    let mut max_node: Option<NodeId> = None;

    while read_record(reader, &mut buf, &format!("hierarchy record {}", edges.len()))? {
        let edge = layout.decode(&buf, edges.len())?;
        max_node = Some(max_node.map_or(edge.max_node(), |m| m.max(edge.max_node())));
        edges.push(edge);
    }

    Ok(Hierarchy {
        node_count: max_node.map_or(0, |m| m as usize + 1),
        edges,
    })
}

pub fn read<P: AsRef<Path>>(path: P, layout: HsgrLayout) -> Result<Hierarchy> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    read_from(&mut BufReader::new(file), layout)
}
