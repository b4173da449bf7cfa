//! Error types for pcdeploy core

use std::path::PathBuf;

/// Errors raised while reading or validating build instructions
#[derive(Debug, thiserror::Error)]
pub enum InstructionsError {
    /// Instructions file could not be read
    #[error("failed to read instructions file {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Instructions are not valid JSON
    #[error("instructions are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A section or entry has the wrong JSON shape
    #[error("{object} is malformed: {message}")]
    Malformed {
        /// Kind of object (repository, deployment, ...)
        object: &'static str,
        /// What was wrong
        message: String,
    },

    /// An entry lacks a mandatory key
    #[error("{object} [{excerpt}...] is misconfigured - missing mandatory key {key}")]
    MissingKey {
        /// Kind of object (repository, deployment, ...)
        object: &'static str,
        /// First characters of the offending entry
        excerpt: String,
        /// The missing key
        key: &'static str,
    },

    /// Deploy entry names an action other than `unzip` or `copy`
    #[error("unsupported deploy operation: [{action}] in [{entry}]")]
    UnsupportedAction {
        /// Action as written in the instructions
        action: String,
        /// The full entry
        entry: String,
    },
}

/// Errors raised while reassembling chunked VM metadata
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// The chunk count is not a non-negative integer
    #[error("invalid instruction chunk count: {0:?}")]
    InvalidChunkCount(String),

    /// A chunk announced by the count is absent
    #[error("instruction chunk {0} is missing from VM metadata")]
    MissingChunk(usize),
}

/// Errors raised while setting up log output
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A log file could not be created or truncated
    #[error("failed to create log file {path}: {source}")]
    File {
        /// Log file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}
