//! Source checkout
//!
//! The pipeline only needs "clone this branch into that directory", so the
//! version-control system sits behind a small trait. [`GitCli`] shells out to
//! the `git` binary.

use crate::error::BuildError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Clones repositories
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone `branch` of `url` into the (empty or absent) directory `dest`
    async fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), BuildError>;
}

/// `git` command-line client
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    /// Use `git` from `PATH`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable
    #[inline]
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), BuildError> {
        let clone_url = if url.ends_with(".git") {
            url.to_string()
        } else {
            format!("{url}.git")
        };

        let output = Command::new(&self.program)
            .arg("clone")
            .arg("--branch")
            .arg(branch)
            .arg("--single-branch")
            .arg(&clone_url)
            .arg(dest)
            .output()
            .await
            .map_err(|e| BuildError::Clone {
                repo: url.to_string(),
                branch: branch.to_string(),
                message: format!("failed to run {}: {}", self.program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BuildError::Clone {
                repo: url.to_string(),
                branch: branch.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
