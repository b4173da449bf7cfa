//! Build settings
//!
//! Settings are resolved from three sources, strongest first: command-line
//! overrides, VM metadata, configuration defaults.

use crate::error::BuildError;
use crate::preset::PresetConfig;
use pcd_core::metadata::{BUILD_NAME_KEY, INSTRUCTIONS_KEY};
use pcd_core::{BuildInstructions, VmMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Link-local endpoint of the OpenStack metadata service
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/openstack/2017-02-22/meta_data.json";

/// Builder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Checkout directory, relative to the start directory unless absolute
    pub git_dir: PathBuf,
    /// Deploy root, relative to the start directory unless absolute
    pub deploy_dir: PathBuf,
    /// Build name when neither the command line nor VM metadata gives one
    pub default_build_name: String,
    /// Metadata service URL
    pub metadata_url: String,
    /// Metadata request timeout in seconds
    pub metadata_timeout_secs: u64,
    /// PhenomeCentral preset
    pub phenomecentral: PresetConfig,
}

impl BuilderConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With metadata service URL
    #[inline]
    #[must_use]
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            git_dir: PathBuf::from("github"),
            deploy_dir: PathBuf::from("deploy"),
            default_build_name: "default_build".to_string(),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            metadata_timeout_secs: 5,
            phenomecentral: PresetConfig::default(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOverrides {
    /// Build name
    pub build_name: Option<String>,
    /// Instructions file
    pub instructions_file: Option<PathBuf>,
    /// Checkout directory
    pub git_dir: Option<PathBuf>,
    /// Deploy root
    pub deploy_dir: Option<PathBuf>,
    /// Keep existing checkouts
    pub no_clean: bool,
    /// Skip the run phase
    pub no_run: bool,
}

/// Fully resolved pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Build name, also the deploy sub-directory
    pub build_name: String,
    /// What to build, deploy and run
    pub instructions: BuildInstructions,
    /// Directory the build was started from; logs and indicators go here
    pub start_directory: PathBuf,
    /// Checkout directory
    pub git_dir: PathBuf,
    /// Deploy root shared by all builds
    pub deploy_dir: PathBuf,
    /// Keep existing checkouts
    pub no_clean: bool,
    /// Skip the run phase
    pub no_run: bool,
}

impl BuildSettings {
    /// Settings with `github/` and `deploy/` under `start_directory`
    #[must_use]
    pub fn new(
        build_name: impl Into<String>,
        instructions: BuildInstructions,
        start_directory: impl Into<PathBuf>,
    ) -> Self {
        let start_directory = start_directory.into();
        let config = BuilderConfig::default();
        Self {
            build_name: build_name.into(),
            instructions,
            git_dir: start_directory.join(config.git_dir),
            deploy_dir: start_directory.join(config.deploy_dir),
            start_directory,
            no_clean: false,
            no_run: false,
        }
    }

    /// Resolve settings from overrides, VM metadata and configuration.
    ///
    /// # Errors
    /// - [`BuildError::NoInstructions`] if no source provides instructions
    /// - [`BuildError::Instructions`] if the instructions do not parse
    pub fn resolve(
        overrides: BuildOverrides,
        vm_metadata: &VmMetadata,
        config: &BuilderConfig,
        start_directory: &Path,
    ) -> Result<Self, BuildError> {
        let build_name = overrides
            .build_name
            .or_else(|| vm_metadata.get(BUILD_NAME_KEY).cloned())
            .unwrap_or_else(|| config.default_build_name.clone());

        let instructions = match (&overrides.instructions_file, vm_metadata.get(INSTRUCTIONS_KEY)) {
            (Some(file), _) => {
                tracing::info!("Using build instructions from {}", file.display());
                BuildInstructions::from_file(&resolve_path(start_directory, file))?
            }
            (None, Some(text)) => {
                tracing::info!("Using build instructions from VM metadata: >>>{}<<<", text);
                BuildInstructions::parse(text)?
            }
            (None, None) => return Err(BuildError::NoInstructions),
        };

        let git_dir = overrides.git_dir.unwrap_or_else(|| config.git_dir.clone());
        let deploy_dir = overrides.deploy_dir.unwrap_or_else(|| config.deploy_dir.clone());

        Ok(Self {
            build_name,
            instructions,
            git_dir: resolve_path(start_directory, &git_dir),
            deploy_dir: resolve_path(start_directory, &deploy_dir),
            start_directory: start_directory.to_path_buf(),
            no_clean: overrides.no_clean,
            no_run: overrides.no_run,
        })
    }

    /// With checkout directory (relative paths resolve against the start directory)
    #[must_use]
    pub fn with_git_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.git_dir = resolve_path(&self.start_directory, dir.as_ref());
        self
    }

    /// With deploy root (relative paths resolve against the start directory)
    #[must_use]
    pub fn with_deploy_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.deploy_dir = resolve_path(&self.start_directory, dir.as_ref());
        self
    }

    /// Keep or wipe existing checkouts
    #[inline]
    #[must_use]
    pub fn with_no_clean(mut self, no_clean: bool) -> Self {
        self.no_clean = no_clean;
        self
    }

    /// Skip or execute the run phase
    #[inline]
    #[must_use]
    pub fn with_no_run(mut self, no_run: bool) -> Self {
        self.no_run = no_run;
        self
    }

    /// `<deploy root>/<build name>`
    #[inline]
    #[must_use]
    pub fn build_deploy_dir(&self) -> PathBuf {
        self.deploy_dir.join(&self.build_name)
    }
}

/// Join `path` onto `base` unless it is already absolute
#[must_use]
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
