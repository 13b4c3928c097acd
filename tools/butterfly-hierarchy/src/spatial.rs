//! Nearest-edge spatial index (.ramIndex / .fileIndex)
//!
//! The grid builder buckets every locatable edge into square cells over its
//! bounding box. `.fileIndex` stores the edge records grouped by cell,
//! `.ramIndex` the small sorted cell directory that a query server keeps in
//! memory to find the run of records for a cell.
//!
//! Both files are little-endian: header, body, CRC-64 footer over header+body.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use butterfly_common::{Error, Result};
use tracing::{debug, info};

use crate::formats::crc::{checksum, DigestWriter};
use crate::graph::{LoadedGraph, NodeId};

const FILE_INDEX_MAGIC: u32 = 0x4246_4958; // "BFIX"
const RAM_INDEX_MAGIC: u32 = 0x4252_4958; // "BRIX"
const VERSION: u16 = 1;
const HEADER_LEN: usize = 20;
const EDGE_RECORD_LEN: usize = 32;
const CELL_ENTRY_LEN: usize = 24;

/// Default cell edge: 0.01 degrees at the 1e5 fixed-point scale
pub const DEFAULT_CELL_SIZE: i32 = 1_000;
/// Edges whose bounding box spans more cells are only filed under their endpoint cells
pub const MAX_CELLS_PER_EDGE: usize = 64;

const LAT_OFFSET: i64 = 90 * 100_000;
const LON_OFFSET: i64 = 180 * 100_000;

/// One snapping candidate handed to the index builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatableEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// `(lat, lon)` of the source node
    pub source_coord: (i32, i32),
    /// `(lat, lon)` of the target node
    pub target_coord: (i32, i32),
    pub bidirectional: bool,
    pub weight: i32,
}

/// Counters reported by an index build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub edges: u64,
    pub cells: u64,
    pub entries: u64,
}

pub trait SpatialIndexBuilder {
    /// Build the index for `edges`, writing both files
    fn build(&self, edges: &[LocatableEdge], ram_index: &Path, file_index: &Path)
        -> Result<IndexSummary>;
}

/// Collect the edges the index should offer as snapping candidates
pub fn locatable_edges(graph: &LoadedGraph) -> Result<Vec<LocatableEdge>> {
    graph
        .edges
        .iter()
        .filter(|e| e.is_locatable())
        .map(|e| {
            Ok(LocatableEdge {
                source: e.source,
                target: e.target,
                source_coord: graph.coordinate(e.source)?,
                target_coord: graph.coordinate(e.target)?,
                bidirectional: e.is_bidirectional(),
                weight: e.weight,
            })
        })
        .collect()
}

/// One entry of the `.ramIndex` directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellEntry {
    pub cell: u64,
    /// Index of the first record of this cell in `.fileIndex`
    pub offset: u64,
    pub count: u32,
}

/// Uniform grid over fixed-point coordinates
#[derive(Debug, Clone, Copy)]
pub struct GridIndexBuilder {
    cell_size: i32,
    max_cells_per_edge: usize,
}

impl Default for GridIndexBuilder {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            max_cells_per_edge: MAX_CELLS_PER_EDGE,
        }
    }
}

impl GridIndexBuilder {
    pub fn new(cell_size: i32, max_cells_per_edge: usize) -> Result<Self> {
        if cell_size <= 0 || max_cells_per_edge == 0 {
            return Err(Error::invariant(format!(
                "invalid grid parameters: cell size {cell_size}, max cells {max_cells_per_edge}"
            )));
        }
        Ok(Self {
            cell_size,
            max_cells_per_edge,
        })
    }

    fn columns(&self) -> i64 {
        (2 * LON_OFFSET + self.cell_size as i64 - 1) / self.cell_size as i64 + 1
    }

    fn rows(&self) -> i64 {
        (2 * LAT_OFFSET + self.cell_size as i64 - 1) / self.cell_size as i64 + 1
    }

    /// `(row, column)` of a `(lat, lon)` coordinate, clamped to the grid
    fn grid_pos(&self, (lat, lon): (i32, i32)) -> (i64, i64) {
        let size = self.cell_size as i64;
        let row = ((lat as i64 + LAT_OFFSET).div_euclid(size)).clamp(0, self.rows() - 1);
        let col = ((lon as i64 + LON_OFFSET).div_euclid(size)).clamp(0, self.columns() - 1);
        (row, col)
    }

    fn cell_id(&self, row: i64, col: i64) -> u64 {
        (row * self.columns() + col) as u64
    }

    /// Cells an edge is filed under
    pub fn cells_for(&self, edge: &LocatableEdge) -> Vec<u64> {
        self.cover(edge).0
    }

    /// Cells plus whether the bounding box was too large to file in full
    fn cover(&self, edge: &LocatableEdge) -> (Vec<u64>, bool) {
        let (r0, c0) = self.grid_pos(edge.source_coord);
        let (r1, c1) = self.grid_pos(edge.target_coord);
        let (row_lo, row_hi) = (r0.min(r1), r0.max(r1));
        let (col_lo, col_hi) = (c0.min(c1), c0.max(c1));

        let span = ((row_hi - row_lo + 1) * (col_hi - col_lo + 1)) as usize;
        if span > self.max_cells_per_edge {
            let mut cells = vec![self.cell_id(r0, c0), self.cell_id(r1, c1)];
            cells.dedup();
            return (cells, true);
        }

        let mut cells = Vec::with_capacity(span);
        for row in row_lo..=row_hi {
            for col in col_lo..=col_hi {
                cells.push(self.cell_id(row, col));
            }
        }
        (cells, false)
    }
}

fn header(magic: u32, cell_size: i32, count: u64) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..4].copy_from_slice(&magic.to_le_bytes());
    buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
    // bytes 6..8 reserved
    buf[8..12].copy_from_slice(&cell_size.to_le_bytes());
    buf[12..20].copy_from_slice(&count.to_le_bytes());
    buf
}

fn edge_record(edge: &LocatableEdge) -> [u8; EDGE_RECORD_LEN] {
    let mut buf = [0u8; EDGE_RECORD_LEN];
    buf[0..4].copy_from_slice(&edge.source.to_le_bytes());
    buf[4..8].copy_from_slice(&edge.target.to_le_bytes());
    buf[8..12].copy_from_slice(&edge.source_coord.0.to_le_bytes());
    buf[12..16].copy_from_slice(&edge.source_coord.1.to_le_bytes());
    buf[16..20].copy_from_slice(&edge.target_coord.0.to_le_bytes());
    buf[20..24].copy_from_slice(&edge.target_coord.1.to_le_bytes());
    buf[24..28].copy_from_slice(&edge.weight.to_le_bytes());
    buf[28] = edge.bidirectional as u8;
    buf
}

fn create(path: &Path) -> Result<DigestWriter<BufWriter<File>>> {
    let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
    Ok(DigestWriter::new(BufWriter::new(file)))
}

impl SpatialIndexBuilder for GridIndexBuilder {
    fn build(
        &self,
        edges: &[LocatableEdge],
        ram_index: &Path,
        file_index: &Path,
    ) -> Result<IndexSummary> {
        let mut filed: Vec<(u64, u32)> = Vec::with_capacity(edges.len());
        let mut capped = 0usize;
        for (i, edge) in edges.iter().enumerate() {
            let (cells, was_capped) = self.cover(edge);
            if was_capped {
                capped += 1;
            }
            filed.extend(cells.into_iter().map(|cell| (cell, i as u32)));
        }
        filed.sort_unstable();
        debug!(entries = filed.len(), capped, "edges bucketed");

        // .fileIndex: records grouped by cell, directory built alongside
        let mut directory: Vec<CellEntry> = Vec::new();
        let mut out = create(file_index)?;
        let io = |e: std::io::Error| Error::io_at(file_index, e);
        out.write_all(&header(FILE_INDEX_MAGIC, self.cell_size, filed.len() as u64))
            .map_err(io)?;
        for (n, &(cell, edge)) in filed.iter().enumerate() {
            match directory.last_mut() {
                Some(entry) if entry.cell == cell => entry.count += 1,
                _ => directory.push(CellEntry {
                    cell,
                    offset: n as u64,
                    count: 1,
                }),
            }
            out.write_all(&edge_record(&edges[edge as usize])).map_err(io)?;
        }
        out.finish().map_err(io)?;

        // .ramIndex: the directory
        let mut out = create(ram_index)?;
        let io = |e: std::io::Error| Error::io_at(ram_index, e);
        out.write_all(&header(RAM_INDEX_MAGIC, self.cell_size, directory.len() as u64))
            .map_err(io)?;
        for entry in &directory {
            let mut buf = [0u8; CELL_ENTRY_LEN];
            buf[0..8].copy_from_slice(&entry.cell.to_le_bytes());
            buf[8..16].copy_from_slice(&entry.offset.to_le_bytes());
            buf[16..20].copy_from_slice(&entry.count.to_le_bytes());
            out.write_all(&buf).map_err(io)?;
        }
        out.finish().map_err(io)?;

        let summary = IndexSummary {
            edges: edges.len() as u64,
            cells: directory.len() as u64,
            entries: filed.len() as u64,
        };
        info!(
            edges = summary.edges,
            cells = summary.cells,
            entries = summary.entries,
            "spatial index written"
        );
        Ok(summary)
    }
}

/// Read a whole index file and check magic, version and checksum, returning
/// the record count from the header and the body bytes
fn read_checked(path: &Path, magic: u32, record_len: usize) -> Result<(u64, Vec<u8>)> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|f| BufReader::new(f).read_to_end(&mut bytes))
        .map_err(|e| Error::io_at(path, e))?;

    let what = path.display().to_string();
    if bytes.len() < HEADER_LEN + 8 {
        return Err(Error::malformed(what, "file shorter than header and footer"));
    }
    let (content, footer) = bytes.split_at(bytes.len() - 8);
    let stored = u64::from_le_bytes([
        footer[0], footer[1], footer[2], footer[3], footer[4], footer[5], footer[6], footer[7],
    ]);
    if stored != checksum(content) {
        return Err(Error::malformed(what, "checksum mismatch"));
    }

    let found = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
    if found != magic {
        return Err(Error::malformed(what, format!("bad magic 0x{found:08x}")));
    }
    let version = u16::from_le_bytes([content[4], content[5]]);
    if version != VERSION {
        return Err(Error::malformed(what, format!("unsupported version {version}")));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&content[12..20]);
    let count = u64::from_le_bytes(count);

    let body = &content[HEADER_LEN..];
    let expected = count
        .checked_mul(record_len as u64)
        .ok_or_else(|| Error::malformed(what.clone(), format!("record count {count} overflows")))?;
    if body.len() as u64 != expected {
        return Err(Error::malformed(
            what,
            format!("{} body bytes for {} records", body.len(), count),
        ));
    }
    Ok((count, body.to_vec()))
}

/// Load the cell directory of a `.ramIndex` file
pub fn read_directory(path: &Path) -> Result<Vec<CellEntry>> {
    let (_, body) = read_checked(path, RAM_INDEX_MAGIC, CELL_ENTRY_LEN)?;
    Ok(body
        .chunks_exact(CELL_ENTRY_LEN)
        .map(|c| {
            let u64_at = |at: usize| {
                let mut b = [0u8; 8];
                b.copy_from_slice(&c[at..at + 8]);
                u64::from_le_bytes(b)
            };
            CellEntry {
                cell: u64_at(0),
                offset: u64_at(8),
                count: u32::from_le_bytes([c[16], c[17], c[18], c[19]]),
            }
        })
        .collect())
}

/// Number of edge entries stored in a `.fileIndex` file
pub fn verify_file_index(path: &Path) -> Result<u64> {
    let (count, _) = read_checked(path, FILE_INDEX_MAGIC, EDGE_RECORD_LEN)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CanonicalEdge, Direction, NodeRecord, FERRY_TYPE};
    use tempfile::tempdir;

    fn edge(source: NodeId, target: NodeId, a: (i32, i32), b: (i32, i32)) -> LocatableEdge {
        LocatableEdge {
            source,
            target,
            source_coord: a,
            target_coord: b,
            bidirectional: true,
            weight: 10,
        }
    }

    #[test]
    fn test_short_edge_stays_in_one_cell() {
        let grid = GridIndexBuilder::default();
        let cells = grid.cells_for(&edge(0, 1, (5_000_100, 400_100), (5_000_200, 400_300)));
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn test_edge_covers_bounding_box() {
        let grid = GridIndexBuilder::default();
        // Crosses one row boundary and one column boundary.
        let cells = grid.cells_for(&edge(0, 1, (999, 999), (1_001, 1_001)));
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn test_long_edge_is_capped() {
        let grid = GridIndexBuilder::new(DEFAULT_CELL_SIZE, 4).unwrap();
        let cells = grid.cells_for(&edge(0, 1, (0, 0), (50_000, 50_000)));
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(GridIndexBuilder::new(0, 4).is_err());
        assert!(GridIndexBuilder::new(10, 0).is_err());
    }

    #[test]
    fn test_ferries_are_not_offered() {
        let graph = LoadedGraph {
            nodes: vec![NodeRecord::new(1, 10, 20), NodeRecord::new(2, 30, 40)],
            edges: vec![
                CanonicalEdge::new(0, 1, 0, 5, Direction::Forward, 3),
                CanonicalEdge::new(1, 0, 0, 5, Direction::Both, FERRY_TYPE),
            ],
        };
        let edges = locatable_edges(&graph).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_coord, (10, 20));
        assert_eq!(edges[0].target_coord, (30, 40));
        assert!(!edges[0].bidirectional);
    }

    #[test]
    fn test_index_files() {
        let dir = tempdir().unwrap();
        let ram = dir.path().join("g.ramIndex");
        let file = dir.path().join("g.fileIndex");

        let edges = vec![
            edge(0, 1, (100, 100), (200, 200)),
            edge(1, 2, (200, 200), (300, 300)),
            edge(2, 3, (999, 999), (1_001, 1_001)),
        ];
        let summary = GridIndexBuilder::default().build(&edges, &ram, &file).unwrap();
        assert_eq!(summary.edges, 3);
        assert_eq!(summary.entries, 6);

        let directory = read_directory(&ram).unwrap();
        assert_eq!(directory.len() as u64, summary.cells);
        assert!(directory.windows(2).all(|w| w[0].cell < w[1].cell));
        let total: u64 = directory.iter().map(|e| e.count as u64).sum();
        assert_eq!(total, summary.entries);
        assert_eq!(verify_file_index(&file).unwrap(), summary.entries);
    }

    #[test]
    fn test_huge_header_count_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.fileIndex");
        let mut bytes = header(FILE_INDEX_MAGIC, DEFAULT_CELL_SIZE, u64::MAX).to_vec();
        bytes.extend_from_slice(&checksum(&bytes).to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = verify_file_index(&path).unwrap_err();
        assert_eq!(err.kind(), butterfly_common::ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_corruption_is_detected() {
        let dir = tempdir().unwrap();
        let ram = dir.path().join("g.ramIndex");
        let file = dir.path().join("g.fileIndex");
        GridIndexBuilder::default()
            .build(&[edge(0, 1, (1, 1), (2, 2))], &ram, &file)
            .unwrap();

        let mut bytes = std::fs::read(&file).unwrap();
        bytes[HEADER_LEN] ^= 0xFF;
        std::fs::write(&file, &bytes).unwrap();
        assert!(verify_file_index(&file).is_err());
    }
}
