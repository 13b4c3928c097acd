//! Error types for the butterfly-osm preprocessing toolkit
//!
//! Every library-level operation reports one of four kinds of failure. Which of
//! them a caller may recover from is a per-format decision made by the loaders,
//! not something encoded here.

use std::fmt;
use std::path::PathBuf;

/// Main error type for butterfly-osm preprocessing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record violates its format: non-positive length or weight, direction
    /// code out of range, truncated or undecodable field.
    #[error("malformed record `{record}`: {reason}")]
    MalformedRecord { record: String, reason: String },

    /// An edge references a node identifier that was never declared.
    #[error("unresolved node identifier {id} after {edges_processed} edges (record `{record}`)")]
    UnresolvedIdentifier {
        id: u32,
        edges_processed: usize,
        record: String,
    },

    /// A file could not be opened, read or written.
    #[error("I/O error{}: {source}", display_path(.path))]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// A precondition between pipeline stages does not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Coarse classification of [`Error`], used for policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRecord,
    UnresolvedIdentifier,
    IoFailure,
    InvariantViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedRecord => "malformed record",
            ErrorKind::UnresolvedIdentifier => "unresolved identifier",
            ErrorKind::IoFailure => "I/O failure",
            ErrorKind::InvariantViolation => "invariant violation",
        };
        f.write_str(name)
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" on {}", p.display()),
        None => String::new(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            Error::UnresolvedIdentifier { .. } => ErrorKind::UnresolvedIdentifier,
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    pub fn malformed(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Wrap an I/O error with the file it happened on
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { path: None, source }
    }
}

/// Convenience result type for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;
