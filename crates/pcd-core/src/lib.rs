//! pcdeploy core
//!
//! Shared building blocks for the deployment toolkit:
//! - The build-instructions document (build / deploy / run sections)
//! - Chunking of the instructions across VM metadata values
//! - Log file and console setup
//! - Stage indicator files polled by the web frontend
//!
//! # Example
//!
//! ```rust
//! use pcd_core::metadata::{compose_vm_metadata, merge_instruction_chunks, INSTRUCTIONS_KEY};
//!
//! let instructions = r#"{"build":[],"deploy":[],"run":[]}"#;
//! let metadata = compose_vm_metadata("nightly", instructions);
//! let merged = merge_instruction_chunks(metadata).unwrap();
//! assert_eq!(merged[INSTRUCTIONS_KEY], instructions);
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod instructions;
pub mod logging;
pub mod metadata;
pub mod progress;

pub use error::{InstructionsError, LoggingError, MetadataError};
pub use instructions::{
    BuildInstructions, DeployAction, DeployArtefact, RepositoryBuild, RunStep, SourceFiles,
};
pub use logging::{init_logging, LogTargets};
pub use metadata::VmMetadata;
pub use progress::{ProgressMarker, Stage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
