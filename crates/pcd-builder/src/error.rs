//! Error types for the build pipeline

use pcd_core::{InstructionsError, MetadataError};
use std::path::PathBuf;

/// Build pipeline error
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Instructions could not be read or validated
    #[error("invalid build instructions: {0}")]
    Instructions(#[from] InstructionsError),

    /// Chunked instructions in VM metadata could not be reassembled
    #[error("invalid VM metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// Neither a file nor VM metadata provided instructions
    #[error(
        "the build/deploy instructions were not provided: set the `build_instructions` VM \
         metadata parameter or pass --build-instructions-file"
    )]
    NoInstructions,

    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Checkout failed
    #[error("failed to check out branch [{branch}] for repo {repo}: {message}")]
    Clone {
        /// Repository URL
        repo: String,
        /// Requested branch
        branch: String,
        /// Tool output or error
        message: String,
    },

    /// Build command exited unsuccessfully
    #[error("building repo {repo} failed ({status})")]
    BuildFailed {
        /// Repository name
        repo: String,
        /// Exit status description
        status: String,
    },

    /// Deploy source directory does not exist
    #[error("deploy source directory {0} does not exist")]
    MissingSource(PathBuf),

    /// Archive extraction failed
    #[error("extracting {archive} to {target} failed ({status})")]
    Unzip {
        /// Archive path (may contain wildcards)
        archive: PathBuf,
        /// Target directory
        target: PathBuf,
        /// Exit status description
        status: String,
    },

    /// No file matched a copy pattern
    #[error("failed to copy {pattern} to {target}: no matching files")]
    NothingToCopy {
        /// File name or wildcard pattern
        pattern: PathBuf,
        /// Target directory
        target: PathBuf,
    },

    /// Run step working directory does not exist
    #[error("the target directory {dir} for command {command} does not exist")]
    MissingWorkDir {
        /// Resolved directory
        dir: PathBuf,
        /// Command that would have run there
        command: String,
    },

    /// Directory regex is invalid
    #[error("invalid directory pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl BuildError {
    /// Wrap an I/O error with context
    #[inline]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this error
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NoInstructions => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(BuildError::NoInstructions.exit_code(), 2);
        assert_eq!(
            BuildError::MissingSource(PathBuf::from("/x")).exit_code(),
            1
        );
    }

    #[test]
    fn io_error_display_includes_context() {
        let err = BuildError::io(
            "creating deploy dir",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "creating deploy dir: denied");
    }
}
