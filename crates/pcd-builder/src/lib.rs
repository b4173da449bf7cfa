//! pcdeploy builder
//!
//! Runs inside a build VM (or on a developer machine) and executes the three
//! phases of a build-instructions document:
//! - **build**: clone every repository at its branch and run its build command
//! - **deploy**: unzip or copy artefacts into `<deploy root>/<build name>`
//! - **run**: start the deployed instance
//!
//! Instructions come from a file or from the VM metadata service, where they
//! are stored in chunks (see [`pcd_core::metadata`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use pcd_builder::{BuildSettings, Pipeline};
//! use pcd_core::BuildInstructions;
//!
//! # async fn example() -> Result<(), pcd_builder::BuildError> {
//! let instructions = BuildInstructions::from_file("build.json".as_ref())?;
//! let settings = BuildSettings::new("nightly", instructions, std::env::current_dir()?);
//! let report = Pipeline::new(settings).run().await?;
//! println!("built {} repositories", report.repositories_built.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod deploy;
pub mod error;
pub mod metadata_service;
pub mod pipeline;
pub mod preset;
mod process;
pub mod settings;
pub mod vcs;

pub use error::BuildError;
pub use metadata_service::MetadataService;
pub use pipeline::{Pipeline, PipelineReport, StepOutcome};
pub use preset::{Branches, PhenomeCentralBuild, PresetConfig};
pub use settings::{BuildOverrides, BuildSettings, BuilderConfig};
pub use vcs::{GitCli, Vcs};
