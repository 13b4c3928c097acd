//! Post-run checks and lock file generation

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use butterfly_common::Error;

use crate::formats::Hierarchy;
use crate::pipeline::OutputPaths;

/// Every index in `0..node_count` must be referenced by some record,
/// otherwise the max-based node count misstates the population
pub fn check_contiguous(hierarchy: &Hierarchy) -> butterfly_common::Result<()> {
    let mut seen = vec![false; hierarchy.node_count];
    for edge in &hierarchy.edges {
        let ids = [Some(edge.source), Some(edge.target), edge.data.payload.middle()];
        for id in ids.into_iter().flatten() {
            match seen.get_mut(id as usize) {
                Some(slot) => *slot = true,
                None => {
                    return Err(Error::invariant(format!(
                        "node {} outside of declared count {}",
                        id, hierarchy.node_count
                    )))
                }
            }
        }
    }
    match seen.iter().position(|s| !s) {
        Some(gap) => Err(Error::invariant(format!(
            "node {} of {} is never referenced by the hierarchy",
            gap, hierarchy.node_count
        ))),
        None => Ok(()),
    }
}

/// The hierarchy may not refer to more nodes than were loaded
pub fn check_node_bound(hierarchy: &Hierarchy, loaded_nodes: usize) -> butterfly_common::Result<()> {
    if hierarchy.node_count > loaded_nodes {
        return Err(Error::invariant(format!(
            "hierarchy references {} nodes but only {} were loaded",
            hierarchy.node_count, loaded_nodes
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub nodes: u64,
    pub input_edges: u64,
    pub skipped_edges: u64,
    pub hierarchy_edges: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockFile {
    pub input_sha256: String,
    pub nodes_sha256: String,
    pub hsgr_sha256: String,
    pub ram_index_sha256: String,
    pub file_index_sha256: String,
    pub format: String,
    pub counts: Counts,
    pub created_at_utc: String,
}

impl LockFile {
    /// Hash the input and every output of a finished run
    pub fn create(input: &Path, outputs: &OutputPaths, format: &str, counts: Counts) -> Result<Self> {
        let lock = Self {
            input_sha256: compute_sha256(input)?,
            nodes_sha256: compute_sha256(&outputs.nodes)?,
            hsgr_sha256: compute_sha256(&outputs.hsgr)?,
            ram_index_sha256: compute_sha256(&outputs.ram_index)?,
            file_index_sha256: compute_sha256(&outputs.file_index)?,
            format: format.to_string(),
            counts,
            created_at_utc: chrono::Utc::now().to_rfc3339(),
        };
        info!(input = %lock.input_sha256, hsgr = %lock.hsgr_sha256, "lock file hashes computed");
        Ok(lock)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)?;
        info!(path = %path.display(), "lock file written");
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// Compute SHA-256 hash of a file
pub fn compute_sha256<P: AsRef<Path>>(path: P) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
