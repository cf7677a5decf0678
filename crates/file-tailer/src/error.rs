//! Error types for file tailing operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// The path cannot be tailed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured encoding label is not known.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// The configured encoding cannot be split on ASCII line terminators.
    #[error("encoding {0} is not ASCII compatible")]
    UnsupportedEncoding(&'static str),

    /// The tailer must be created from within a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// A scan was abandoned because a newer search replaced it.
    #[error("superseded by a newer search")]
    Superseded,

    /// The tailer was disposed while work was in flight.
    #[error("tailer disposed")]
    Cancelled,

    /// A blocking recomputation panicked or was aborted.
    #[error("recomputation task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
