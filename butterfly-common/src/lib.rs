//! Common utilities for the butterfly-osm toolkit

pub mod error;

pub use error::{Error, ErrorKind, Result};

#[cfg(test)]
mod tests {
    use crate::error::{Error, ErrorKind};

    #[test]
    fn io_errors_keep_their_kind() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
