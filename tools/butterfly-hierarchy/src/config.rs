//! Contractor configuration (`contractor.ini`)
//!
//! ```text
//! Threads = 4
//! ```
//!
//! Unknown keys are ignored. The thread count only sizes the worker pool; it
//! never changes what the run produces.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "contractor.ini";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContractorConfig {
    /// Requested worker threads; 0 or absent means all logical CPUs
    #[serde(rename = "Threads", default)]
    pub threads: Option<usize>,
}

impl ContractorConfig {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), threads = ?config.threads, "configuration loaded");
        Ok(config)
    }

    /// Load `explicit` if given, otherwise `contractor.ini` from the working
    /// directory when present, otherwise defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    Self::load(path)
                } else {
                    debug!("no {DEFAULT_CONFIG_FILE}, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn effective_threads(&self) -> usize {
        clamp_threads(self.threads, num_cpus::get())
    }

    /// Worker pool for the parallel parts of contraction
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, ConfigError> {
        let threads = self.effective_threads();
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("contractor-{i}"))
            .build()?)
    }
}

fn clamp_threads(configured: Option<usize>, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    match configured {
        Some(n) if n > 0 && n <= cpus => n,
        Some(n) if n > cpus => {
            warn!(requested = n, available = cpus, "thread count clamped to available CPUs");
            cpus
        }
        _ => cpus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_threads() {
        let config = ContractorConfig::parse("Threads = 4\n").unwrap();
        assert_eq!(config.threads, Some(4));
        assert_eq!(ContractorConfig::parse("").unwrap(), ContractorConfig::default());
        assert_eq!(
            ContractorConfig::parse("Threads = 2\nSRTM = \"/data\"\n").unwrap().threads,
            Some(2)
        );
    }

    #[test]
    fn test_rejects_bad_value() {
        assert!(ContractorConfig::parse("Threads = \"many\"").is_err());
        assert!(ContractorConfig::parse("Threads = -1").is_err());
    }

    #[test]
    fn test_clamp_threads() {
        assert_eq!(clamp_threads(Some(2), 8), 2);
        assert_eq!(clamp_threads(Some(64), 8), 8);
        assert_eq!(clamp_threads(Some(0), 8), 8);
        assert_eq!(clamp_threads(None, 8), 8);
        assert_eq!(clamp_threads(None, 0), 1);
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Threads = 1").unwrap();
        let config = ContractorConfig::load(file.path()).unwrap();
        assert_eq!(config.effective_threads(), 1);
        assert_eq!(config.thread_pool().unwrap().current_num_threads(), 1);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = ContractorConfig::discover(Some(Path::new("/nonexistent/contractor.ini")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
