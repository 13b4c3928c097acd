//! Preprocessing pipeline
//!
//! ```text
//! Load -> DeriveTurnInfo -> BuildSpatialIndex -> WriteNodeTable
//!      -> Contract -> CheckInvariants -> Cleanup -> WriteHierarchy
//! ```
//!
//! Each stage takes ownership of what the previous one produced. Any failure
//! ends the run; outputs are written next to their final names with a `.tmp`
//! suffix and only renamed into place once every stage has succeeded.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::contract::{check_original_edges, ChContractor, Cleanup, Contractor, DedupCleanup};
use crate::formats::{self, hsgr, nodes, HsgrLayout, InputFormat};
use crate::graph::{check_edges, LoadedGraph};
use crate::spatial::{self, GridIndexBuilder, SpatialIndexBuilder};
use crate::turn_info::{self, JunctionTurnInfo, TurnInfoDeriver};
use crate::validate::{self, Counts, LockFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Load,
    DeriveTurnInfo,
    BuildSpatialIndex,
    WriteNodeTable,
    Contract,
    CheckInvariants,
    Cleanup,
    WriteHierarchy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::DeriveTurnInfo => "derive turn info",
            Stage::BuildSpatialIndex => "build spatial index",
            Stage::WriteNodeTable => "write node table",
            Stage::Contract => "contract",
            Stage::CheckInvariants => "check invariants",
            Stage::Cleanup => "cleanup",
            Stage::WriteHierarchy => "write hierarchy",
        };
        f.write_str(name)
    }
}

/// Output files of a run, derived from the input path by suffix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputPaths {
    pub nodes: PathBuf,
    pub hsgr: PathBuf,
    pub ram_index: PathBuf,
    pub file_index: PathBuf,
    pub lock: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl OutputPaths {
    pub fn for_input(input: &Path) -> Self {
        Self {
            nodes: with_suffix(input, ".nodes"),
            hsgr: with_suffix(input, ".hsgr"),
            ram_index: with_suffix(input, ".ramIndex"),
            file_index: with_suffix(input, ".fileIndex"),
            lock: with_suffix(input, ".hsgr.lock.json"),
        }
    }
}

/// Temporary siblings of the final outputs; removed again unless committed
struct Staged {
    files: Vec<(PathBuf, PathBuf)>,
    committed: bool,
}

impl Staged {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            committed: false,
        }
    }

    /// Register `target` and return the temporary path to write instead
    fn stage(&mut self, target: &Path) -> PathBuf {
        let tmp = with_suffix(target, ".tmp");
        self.files.push((tmp.clone(), target.to_path_buf()));
        tmp
    }

    /// Move every staged file into place. Existing outputs are set aside as
    /// `.old` first; if any move fails, the ones already done are undone so
    /// the final names keep their previous contents.
    fn commit(mut self) -> Result<()> {
        let mut done: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(self.files.len());
        for (tmp, target) in &self.files {
            match replace(tmp, target) {
                Ok(backup) => done.push((target.clone(), backup)),
                Err(e) => {
                    roll_back(&done);
                    return Err(e);
                }
            }
        }
        for (_, backup) in &done {
            if let Some(backup) = backup {
                if let Err(e) = fs::remove_file(backup) {
                    warn!(path = %backup.display(), error = %e, "could not remove previous output");
                }
            }
        }
        self.committed = true;
        Ok(())
    }
}

/// Rename `tmp` to `target`, returning where the previous `target` was moved
fn replace(tmp: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let backup = if target.exists() {
        let backup = with_suffix(target, ".old");
        fs::rename(target, &backup).with_context(|| {
            format!("Failed to move {} aside", target.display())
        })?;
        Some(backup)
    } else {
        None
    };
    if let Err(e) = fs::rename(tmp, target) {
        if let Some(backup) = &backup {
            if let Err(e) = fs::rename(backup, target) {
                warn!(path = %target.display(), error = %e, "could not restore previous output");
            }
        }
        return Err(e).with_context(|| {
            format!("Failed to move {} to {}", tmp.display(), target.display())
        });
    }
    Ok(backup)
}

fn roll_back(done: &[(PathBuf, Option<PathBuf>)]) {
    for (target, backup) in done.iter().rev() {
        let restored = match backup {
            Some(backup) => fs::rename(backup, target),
            None => fs::remove_file(target),
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), error = %e, "could not roll back output");
        }
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (tmp, _) in &self.files {
            if tmp.exists() {
                if let Err(e) = fs::remove_file(tmp) {
                    warn!(path = %tmp.display(), error = %e, "could not remove temporary file");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub nodes: u64,
    pub input_edges: u64,
    pub skipped_edges: u64,
    pub locatable_edges: u64,
    pub contracted_edges: u64,
    pub hierarchy_edges: u64,
    pub stages: Vec<StageTiming>,
    pub outputs: OutputPaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub format: InputFormat,
    /// Re-read the hierarchy before committing and check it
    pub verify: bool,
    /// Write `<input>.hsgr.lock.json` after success
    pub write_lock: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            format: InputFormat::OsrmText,
            verify: false,
            write_lock: true,
        }
    }
}

fn run_stage<T>(
    stage: Stage,
    timings: &mut Vec<StageTiming>,
    f: impl FnOnce() -> butterfly_common::Result<T>,
) -> Result<T> {
    info!(%stage, "stage started");
    let start = Instant::now();
    let out = f().with_context(|| format!("{stage} failed"))?;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(%stage, elapsed_ms, "stage finished");
    timings.push(StageTiming { stage, elapsed_ms });
    Ok(out)
}

/// The preprocessing run with its pluggable collaborators
pub struct Pipeline {
    options: PipelineOptions,
    turn_info: Box<dyn TurnInfoDeriver>,
    spatial: Box<dyn SpatialIndexBuilder>,
    contractor: Box<dyn Contractor>,
    cleanup: Box<dyn Cleanup>,
    pool: Option<rayon::ThreadPool>,
}

impl Pipeline {
    /// Pipeline with the default collaborators
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            turn_info: Box::new(JunctionTurnInfo),
            spatial: Box::new(GridIndexBuilder::default()),
            contractor: Box::new(ChContractor::default()),
            cleanup: Box::new(DedupCleanup),
            pool: None,
        }
    }

    pub fn with_turn_info(mut self, turn_info: Box<dyn TurnInfoDeriver>) -> Self {
        self.turn_info = turn_info;
        self
    }

    pub fn with_spatial_index(mut self, spatial: Box<dyn SpatialIndexBuilder>) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn with_contractor(mut self, contractor: Box<dyn Contractor>) -> Self {
        self.contractor = contractor;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Box<dyn Cleanup>) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Run contraction on `pool` instead of the global rayon pool
    pub fn with_thread_pool(mut self, pool: rayon::ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn run(&self, input: &Path) -> Result<PipelineReport> {
        let format = self.options.format;
        if !format.has_coordinates() {
            return Err(butterfly_common::Error::invariant(format!(
                "{format} input has no coordinate table; the node table and spatial index need one"
            )))
            .with_context(|| format!("Cannot preprocess {}", input.display()));
        }

        let outputs = OutputPaths::for_input(input);
        let mut staged = Staged::new();
        let mut stages = Vec::new();
        info!(input = %input.display(), %format, "preprocessing");

        let loaded = run_stage(Stage::Load, &mut stages, || formats::load_path(format, input))?;
        let report = loaded.report;
        let LoadedGraph { nodes, edges } = loaded.graph;
        let node_count = nodes.len();

        let edges = run_stage(Stage::DeriveTurnInfo, &mut stages, || {
            let flags = self.turn_info.derive(node_count, &edges)?;
            turn_info::apply(edges, &flags)
        })?;
        let graph = LoadedGraph { nodes, edges };

        let ram_tmp = staged.stage(&outputs.ram_index);
        let file_tmp = staged.stage(&outputs.file_index);
        let index = run_stage(Stage::BuildSpatialIndex, &mut stages, || {
            let locatable = spatial::locatable_edges(&graph)?;
            self.spatial.build(&locatable, &ram_tmp, &file_tmp)
        })?;

        let nodes_tmp = staged.stage(&outputs.nodes);
        run_stage(Stage::WriteNodeTable, &mut stages, || {
            nodes::write(&nodes_tmp, &graph.nodes)
        })?;
        // Coordinates are not needed past this point.
        let LoadedGraph { nodes, edges } = graph;
        drop(nodes);

        let contractor: &dyn Contractor = self.contractor.as_ref();
        let contracted = run_stage(Stage::Contract, &mut stages, || {
            check_edges(node_count, &edges)?;
            match &self.pool {
                Some(pool) => pool.install(|| contractor.contract(node_count, &edges)),
                None => contractor.contract(node_count, &edges),
            }
        })?;
        let contracted_edges = contracted.len() as u64;

        run_stage(Stage::CheckInvariants, &mut stages, || {
            check_original_edges(&edges, &contracted)
        })?;
        let input_edges = edges.len() as u64;
        drop(edges);

        let cleaned = run_stage(Stage::Cleanup, &mut stages, || self.cleanup.clean(contracted))?;

        let hsgr_tmp = staged.stage(&outputs.hsgr);
        let hierarchy_edges = run_stage(Stage::WriteHierarchy, &mut stages, || {
            let written = hsgr::write(&hsgr_tmp, &cleaned)?;
            if self.options.verify {
                let hierarchy = hsgr::read(&hsgr_tmp, HsgrLayout::Current)?;
                validate::check_node_bound(&hierarchy, node_count)?;
                validate::check_contiguous(&hierarchy)?;
                info!(nodes = hierarchy.node_count, edges = hierarchy.edges.len(), "hierarchy verified");
            }
            Ok(written)
        })?;

        // A lock from an earlier run describes outputs about to be replaced.
        if outputs.lock.exists() {
            fs::remove_file(&outputs.lock).with_context(|| {
                format!("Failed to remove stale {}", outputs.lock.display())
            })?;
        }
        staged.commit()?;

        let report = PipelineReport {
            nodes: node_count as u64,
            input_edges,
            skipped_edges: report.skipped_edges,
            locatable_edges: index.edges,
            contracted_edges,
            hierarchy_edges,
            stages,
            outputs,
        };

        if self.options.write_lock {
            let counts = Counts {
                nodes: report.nodes,
                input_edges: report.input_edges,
                skipped_edges: report.skipped_edges,
                hierarchy_edges: report.hierarchy_edges,
            };
            LockFile::create(input, &report.outputs, &format.to_string(), counts)?
                .write(&report.outputs.lock)?;
        }

        info!(
            nodes = report.nodes,
            edges = report.input_edges,
            skipped = report.skipped_edges,
            hierarchy_edges = report.hierarchy_edges,
            "preprocessing finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::HierarchyEdge;
    use crate::graph::CanonicalEdge;
    use butterfly_common::ErrorKind;
    use tempfile::tempdir;

    const SMALL_GRAPH: &str = "\
4
10 5000000 400000
20 5000100 400100
30 5000200 400000
40 5000100 399900
4
10 20 100 0 11 1 7
20 30 100 0 12 1 8
30 40 100 1 13 1 9
40 10 100 0 14 14 10
";

    #[test]
    fn test_output_paths_append_suffix() {
        let paths = OutputPaths::for_input(Path::new("/data/map.osrm"));
        assert_eq!(paths.nodes, PathBuf::from("/data/map.osrm.nodes"));
        assert_eq!(paths.hsgr, PathBuf::from("/data/map.osrm.hsgr"));
        assert_eq!(paths.ram_index, PathBuf::from("/data/map.osrm.ramIndex"));
        assert_eq!(paths.file_index, PathBuf::from("/data/map.osrm.fileIndex"));
        assert_eq!(paths.lock, PathBuf::from("/data/map.osrm.hsgr.lock.json"));
    }

    #[test]
    fn test_run_writes_all_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("small.osrm");
        fs::write(&input, SMALL_GRAPH).unwrap();

        let options = PipelineOptions {
            verify: true,
            ..PipelineOptions::default()
        };
        let report = Pipeline::new(options).run(&input).unwrap();

        assert_eq!(report.nodes, 4);
        assert_eq!(report.input_edges, 4);
        assert_eq!(report.locatable_edges, 3);
        assert_eq!(report.stages.len(), 8);
        assert_eq!(report.stages[0].stage, Stage::Load);
        assert_eq!(report.stages[7].stage, Stage::WriteHierarchy);

        let outputs = &report.outputs;
        for path in [&outputs.nodes, &outputs.hsgr, &outputs.ram_index, &outputs.file_index, &outputs.lock] {
            assert!(path.exists(), "{} missing", path.display());
            assert!(!with_suffix(path, ".tmp").exists());
        }

        let table = nodes::read(&outputs.nodes).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table[2].external_id, 30);

        let hierarchy = hsgr::read(&outputs.hsgr, HsgrLayout::Current).unwrap();
        assert_eq!(hierarchy.edges.len() as u64, report.hierarchy_edges);
        assert_eq!(hierarchy.node_count, 4);

        let lock = LockFile::read(&outputs.lock).unwrap();
        assert_eq!(lock.counts.nodes, 4);
        assert_eq!(lock.format, "osrm-text");
    }

    #[test]
    fn test_failed_run_leaves_no_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.osrm");
        fs::write(&input, "2\n1 0 0\n2 0 0\n1\n1 3 5 0 5 0 0\n").unwrap();

        let err = Pipeline::new(PipelineOptions::default()).run(&input).unwrap_err();
        let cause = err.downcast_ref::<butterfly_common::Error>().unwrap();
        assert_eq!(cause.kind(), ErrorKind::UnresolvedIdentifier);

        let outputs = OutputPaths::for_input(&input);
        assert!(!outputs.nodes.exists());
        assert!(!outputs.hsgr.exists());
    }

    #[test]
    fn test_failed_commit_restores_previous_outputs() {
        let dir = tempdir().unwrap();
        let fresh = dir.path().join("a.ramIndex");
        let first = dir.path().join("a.nodes");
        let second = dir.path().join("a.hsgr");
        fs::write(&first, b"old nodes").unwrap();
        fs::write(&second, b"old hsgr").unwrap();
        // A non-empty directory where `second` would be set aside
        let blocker = with_suffix(&second, ".old");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        let mut staged = Staged::new();
        for target in [&fresh, &first, &second] {
            fs::write(staged.stage(target), b"new").unwrap();
        }
        assert!(staged.commit().is_err());

        assert_eq!(fs::read(&first).unwrap(), b"old nodes");
        assert_eq!(fs::read(&second).unwrap(), b"old hsgr");
        assert!(!fresh.exists());
        assert!(!with_suffix(&first, ".old").exists());
        for target in [&fresh, &first, &second] {
            assert!(!with_suffix(target, ".tmp").exists());
        }
    }

    #[test]
    fn test_commit_replaces_existing_outputs() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.nodes");
        fs::write(&target, b"old").unwrap();

        let mut staged = Staged::new();
        fs::write(staged.stage(&target), b"new").unwrap();
        staged.commit().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!with_suffix(&target, ".old").exists());
    }

    #[test]
    fn test_no_lock_run_removes_stale_lock() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("small.osrm");
        fs::write(&input, SMALL_GRAPH).unwrap();

        let report = Pipeline::new(PipelineOptions::default()).run(&input).unwrap();
        assert!(report.outputs.lock.exists());

        let options = PipelineOptions {
            write_lock: false,
            ..PipelineOptions::default()
        };
        let report = Pipeline::new(options).run(&input).unwrap();
        assert!(!report.outputs.lock.exists());
        assert!(report.outputs.hsgr.exists());
    }

    #[test]
    fn test_ddsg_is_rejected() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("g.ddsg");
        fs::write(&input, "d\n2 1\n1 2 5 0\n").unwrap();

        let options = PipelineOptions {
            format: InputFormat::Ddsg,
            ..PipelineOptions::default()
        };
        let err = Pipeline::new(options).run(&input).unwrap_err();
        let cause = err.downcast_ref::<butterfly_common::Error>().unwrap();
        assert_eq!(cause.kind(), ErrorKind::InvariantViolation);
    }

    /// Contractor that drops everything, so the invariant check must fire
    struct Forgetful;

    impl Contractor for Forgetful {
        fn contract(
            &self,
            _node_count: usize,
            _edges: &[CanonicalEdge],
        ) -> butterfly_common::Result<Vec<HierarchyEdge>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_invariant_check_catches_bad_contractor() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("small.osrm");
        fs::write(&input, SMALL_GRAPH).unwrap();

        let options = PipelineOptions {
            write_lock: false,
            ..PipelineOptions::default()
        };
        let err = Pipeline::new(options)
            .with_contractor(Box::new(Forgetful))
            .run(&input)
            .unwrap_err();
        assert!(format!("{err:#}").contains("check invariants failed"));
        assert!(!OutputPaths::for_input(&input).nodes.exists());
    }

    #[test]
    fn test_dedicated_pool_gives_same_hierarchy() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.osrm");
        let b = dir.path().join("b.osrm");
        fs::write(&a, SMALL_GRAPH).unwrap();
        fs::write(&b, SMALL_GRAPH).unwrap();

        let options = PipelineOptions {
            write_lock: false,
            ..PipelineOptions::default()
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        Pipeline::new(options).with_thread_pool(pool).run(&a).unwrap();
        Pipeline::new(options).run(&b).unwrap();

        let left = fs::read(OutputPaths::for_input(&a).hsgr).unwrap();
        let right = fs::read(OutputPaths::for_input(&b).hsgr).unwrap();
        assert_eq!(left, right);
    }
}
