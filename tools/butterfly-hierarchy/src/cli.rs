//! CLI for butterfly-hierarchy

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::config::ContractorConfig;
use crate::formats::InputFormat;
use crate::pipeline::{Pipeline, PipelineOptions, PipelineReport};

#[derive(Parser, Debug)]
#[command(name = "butterfly-hierarchy")]
#[command(author, version, about = "Preprocess a road graph into a contraction hierarchy", long_about = None)]
pub struct Cli {
    /// Input graph file; outputs are written next to it (.nodes, .hsgr, .ramIndex, .fileIndex)
    #[arg(value_name = "INPUT_FILE")]
    pub input: PathBuf,

    /// Input format: osrm-text, osrm-binary, speed-class or ddsg
    #[arg(short, long, default_value = "osrm-text")]
    pub format: InputFormat,

    /// Contractor configuration (defaults to ./contractor.ini when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Re-read the hierarchy and check it before committing the outputs
    #[arg(long)]
    pub verify: bool,

    /// Skip writing <INPUT_FILE>.hsgr.lock.json
    #[arg(long)]
    pub no_lock: bool,

    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = ContractorConfig::discover(self.config.as_deref())?;
        let pool = config.thread_pool()?;
        info!(threads = pool.current_num_threads(), "worker pool ready");

        let options = PipelineOptions {
            format: self.format,
            verify: self.verify,
            write_lock: !self.no_lock,
        };
        let report = Pipeline::new(options)
            .with_thread_pool(pool)
            .run(&self.input)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_summary(&report);
        }
        Ok(())
    }
}

fn print_summary(report: &PipelineReport) {
    let total_ms: u64 = report.stages.iter().map(|s| s.elapsed_ms).sum();
    println!("✅ Preprocessing complete in {:.2}s", total_ms as f64 / 1000.0);
    println!("  Nodes:            {}", report.nodes);
    println!("  Input edges:      {}", report.input_edges);
    if report.skipped_edges > 0 {
        println!("  Skipped edges:    {}", report.skipped_edges);
    }
    println!("  Hierarchy edges:  {}", report.hierarchy_edges);
    for path in [
        &report.outputs.nodes,
        &report.outputs.hsgr,
        &report.outputs.ram_index,
        &report.outputs.file_index,
    ] {
        println!("  ✓ {}", path.display());
    }
}
