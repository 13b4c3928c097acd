//! .nodes format - coordinate table indexed by internal node id
//!
//! A flat sequence of 12-byte records `{ lon: i32, lat: i32, id: u32 }` in host
//! byte order with no header; record `i` describes internal node `i`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use butterfly_common::{Error, Result};

use super::read_record;
use crate::graph::NodeRecord;

pub const RECORD_LEN: usize = 12;

fn encode(node: &NodeRecord) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..4].copy_from_slice(&node.lon.to_ne_bytes());
    buf[4..8].copy_from_slice(&node.lat.to_ne_bytes());
    buf[8..12].copy_from_slice(&node.external_id.to_ne_bytes());
    buf
}

fn decode(buf: &[u8; RECORD_LEN]) -> NodeRecord {
    NodeRecord {
        lon: i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
        lat: i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
        external_id: u32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]),
    }
}

pub fn write_to<W: Write>(writer: &mut W, nodes: &[NodeRecord]) -> Result<()> {
    for node in nodes {
        writer.write_all(&encode(node))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the coordinate table to `path`
pub fn write<P: AsRef<Path>>(path: P, nodes: &[NodeRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
    let mut writer = BufWriter::new(file);
    write_to(&mut writer, nodes).map_err(|e| match e {
        Error::Io { path: None, source } => Error::io_at(path, source),
        other => other,
    })
}

pub fn read_from<R: Read>(reader: &mut R) -> Result<Vec<NodeRecord>> {
    let mut nodes = Vec::new();
    let mut buf = [0u8; RECORD_LEN];
    while read_record(reader, &mut buf, &format!("node {}", nodes.len()))? {
        nodes.push(decode(&buf));
    }
    Ok(nodes)
}

/// Read a coordinate table back from `path`
pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<NodeRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    read_from(&mut BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_field_order() {
        let bytes = encode(&NodeRecord::new(7, 2, 1));
        assert_eq!(&bytes[0..4], &1i32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_ne_bytes());
    }

    #[test]
    fn test_nodes_write_read() {
        let nodes = vec![
            NodeRecord::new(100, 5_050_000, 450_000),
            NodeRecord::new(200, -3_300_000, -7_000_000),
            NodeRecord::new(150, 0, 0),
        ];

        let tmpfile = NamedTempFile::new().unwrap();
        write(tmpfile.path(), &nodes).unwrap();

        let len = std::fs::metadata(tmpfile.path()).unwrap().len();
        assert_eq!(len, (nodes.len() * RECORD_LEN) as u64);
        assert_eq!(read(tmpfile.path()).unwrap(), nodes);
    }

    #[test]
    fn test_partial_record_is_rejected() {
        let mut bytes = Vec::new();
        write_to(&mut bytes, &[NodeRecord::new(1, 2, 3)]).unwrap();
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(read_from(&mut bytes.as_slice()).is_err());
    }
}
