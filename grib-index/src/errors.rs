use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::codec::Variant;
use crate::coord::Axis;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The index file could not be decoded. Callers should regenerate it.
    #[error("index format error: {0}")]
    IndexFormat(String),

    /// The index file was written by a format version this reader no longer decodes. Not
    /// corruption, but still means the index should be regenerated.
    #[error("{variant} index version {found} is older than minimum supported version {minimum}")]
    IndexVersionTooOld {
        variant: Variant,
        found: u32,
        minimum: u32,
    },

    /// A coordinate exists for a variable in one partition but not in another.
    #[error("{axis} coordinate for {variable} exists in only one of canonical and {partition}")]
    CoordinateMismatch {
        partition: String,
        variable: String,
        axis: Axis,
    },

    #[error("no partitions of {0} could be opened")]
    NoPartitionsSucceeded(String),

    #[error("collection {0} has no contributing source files")]
    NoSourceFiles(String),

    #[error("unable to write index {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Whether this error means an index on disk is unusable and should be rebuilt, as opposed to
    /// a problem that should be surfaced to the caller.
    ///
    pub fn should_rebuild(&self) -> bool {
        match self {
            Error::IndexFormat(_) | Error::IndexVersionTooOld { .. } => true,
            Error::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_rebuild() {
        assert!(Error::IndexFormat("bad".into()).should_rebuild());
        assert!(Error::IndexVersionTooOld {
            variant: Variant::Plain,
            found: 0,
            minimum: 1
        }
        .should_rebuild());
        assert!(Error::Io(io::Error::from(io::ErrorKind::NotFound)).should_rebuild());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::PermissionDenied)).should_rebuild());
        assert!(!Error::NoPartitionsSucceeded("gfs".into()).should_rebuild());
    }
}
