//! Stage indicator files
//!
//! The web frontend tracks a running build by polling for empty
//! `__<stage>.indicator` files in the directory the build was started from.

use std::path::{Path, PathBuf};

/// Build stages reported to the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Settings parsed, about to prepare folders
    Started,
    /// Cloning and building repositories
    Building,
    /// Running the start commands
    StartingInstance,
    /// Everything done
    Finished,
    /// A fatal error stopped the build
    Failed,
}

impl Stage {
    /// Name used in the indicator file
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Building => "building",
            Self::StartingInstance => "starting_instance",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// Writes stage indicators into a fixed directory
#[derive(Debug, Clone)]
pub struct ProgressMarker {
    dir: PathBuf,
}

impl ProgressMarker {
    /// Mark progress inside `dir`
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the indicator for `stage`
    #[must_use]
    pub fn indicator_path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("__{}.indicator", stage.as_str()))
    }

    /// Create the indicator for `stage`.
    ///
    /// Failures are logged, never propagated: a missing indicator must not
    /// abort a build.
    pub fn mark(&self, stage: Stage) {
        let path = self.indicator_path(stage);
        if let Err(e) = std::fs::File::create(&path) {
            tracing::warn!("failed to create progress indicator {}: {}", path.display(), e);
        }
    }

    /// Directory holding the indicators
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_create_indicator_files() {
        let dir = tempfile::tempdir().unwrap();
        let marker = ProgressMarker::new(dir.path());

        marker.mark(Stage::Started);
        marker.mark(Stage::StartingInstance);

        assert!(dir.path().join("__started.indicator").is_file());
        assert!(dir.path().join("__starting_instance.indicator").is_file());
        assert!(!marker.indicator_path(Stage::Failed).exists());
    }

    #[test]
    fn unwritable_directory_does_not_panic() {
        let marker = ProgressMarker::new("/nonexistent/progress");
        marker.mark(Stage::Failed);
    }
}
