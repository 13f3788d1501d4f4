use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the inspection pipeline that are not metadata outcomes.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: u64, actual: u64 },
}

pub type Result<T> = std::result::Result<T, InspectError>;
