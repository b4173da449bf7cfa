//! Log output
//!
//! Every command logs to a main file (wiped on start) and to the console.
//! Deploy and upload commands additionally mirror into a "latest" log that
//! the web frontend serves while the command runs.

use crate::error::LoggingError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info";

/// Files receiving log output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTargets {
    /// Main log file
    pub main_log: PathBuf,
    /// Optional copy of the log served to the web frontend
    pub mirror_log: Option<PathBuf>,
}

impl LogTargets {
    /// Log to `main_log` only
    #[inline]
    #[must_use]
    pub fn new(main_log: impl Into<PathBuf>) -> Self {
        Self {
            main_log: main_log.into(),
            mirror_log: None,
        }
    }

    /// Also mirror to `path`
    #[inline]
    #[must_use]
    pub fn with_mirror(mut self, path: impl Into<PathBuf>) -> Self {
        self.mirror_log = Some(path.into());
        self
    }
}

/// Install the global subscriber: console, main file and optional mirror.
///
/// # Errors
/// Fails if a log file cannot be created or a subscriber is already set.
pub fn init_logging(targets: &LogTargets) -> Result<(), LoggingError> {
    let main = create_log_file(&targets.main_log)?;
    let mirror = targets
        .mirror_log
        .as_deref()
        .map(create_log_file)
        .transpose()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();
    let main_layer = fmt::layer()
        .with_writer(Mutex::new(main))
        .with_ansi(false)
        .with_target(false);
    let mirror_layer = mirror.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(main_layer)
        .with(mirror_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))
}

/// Create `path`, truncating any previous run's log.
///
/// # Errors
/// Fails if the file cannot be created.
pub fn create_log_file(path: &Path) -> Result<File, LoggingError> {
    File::create(path).map_err(|source| LoggingError::File {
        path: path.to_path_buf(),
        source,
    })
}
