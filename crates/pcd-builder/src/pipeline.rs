//! Build pipeline
//!
//! Drives a build through its phases and reports progress through indicator
//! files:
//!
//! ```text
//! started -> building -> [build] -> [deploy] -> starting_instance -> [run] -> finished
//!                                  (any fatal error)                 -> failed
//! ```

use crate::deploy::{find_dir_by_regexp, Deployer};
use crate::error::BuildError;
use crate::process::{describe, shell};
use crate::settings::BuildSettings;
use crate::vcs::{GitCli, Vcs};
use pcd_core::{ProgressMarker, RepositoryBuild, RunStep, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a run-phase command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Command as written in the instructions
    pub command: String,
    /// Exit code; `None` if killed by a signal or left running detached
    pub exit_code: Option<i32>,
}

/// Summary of a completed pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Repositories cloned and built
    pub repositories_built: Vec<String>,
    /// Repositories skipped thanks to `continue_on_fail`
    pub repositories_skipped: Vec<String>,
    /// Files installed by the deploy phase
    pub files_deployed: usize,
    /// Run-phase commands in execution order
    pub steps: Vec<StepOutcome>,
    /// Wall-clock time in milliseconds
    pub execution_time_ms: u64,
}

/// Executes build instructions
pub struct Pipeline {
    settings: BuildSettings,
    vcs: Arc<dyn Vcs>,
    progress: ProgressMarker,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline using the `git` CLI, marking progress in the start directory
    #[must_use]
    pub fn new(settings: BuildSettings) -> Self {
        let progress = ProgressMarker::new(&settings.start_directory);
        Self {
            settings,
            vcs: Arc::new(GitCli::new()),
            progress,
        }
    }

    /// Create with custom checkout backend
    #[must_use]
    pub fn with_vcs(mut self, vcs: Arc<dyn Vcs>) -> Self {
        self.vcs = vcs;
        self
    }

    /// Get settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Run every phase.
    ///
    /// On failure the `failed` indicator is written before the error is
    /// returned.
    ///
    /// # Errors
    /// Returns the first fatal error of any phase.
    pub async fn run(&self) -> Result<PipelineReport, BuildError> {
        let start_time = Instant::now();
        self.progress.mark(Stage::Started);

        tracing::info!("Build name: {}", self.settings.build_name);
        tracing::info!("Deployment directory: {}", self.settings.build_deploy_dir().display());

        match self.run_phases().await {
            Ok(mut report) => {
                report.execution_time_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.progress.mark(Stage::Finished);
                tracing::info!("DONE");
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Error: {}", e);
                self.progress.mark(Stage::Failed);
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<PipelineReport, BuildError> {
        let mut report = PipelineReport::default();

        self.prepare_folders().await?;
        self.progress.mark(Stage::Building);

        let instructions = &self.settings.instructions;

        if let Some(repositories) = &instructions.build {
            tracing::info!("==> Started build phase...");
            for repository in repositories {
                let name = repository.name().to_string();
                if self.build_repository(repository).await? {
                    report.repositories_built.push(name);
                } else {
                    report.repositories_skipped.push(name);
                }
            }
        }

        if let Some(artefacts) = &instructions.deploy {
            tracing::info!("==> Started deploy phase...");
            let deployer = Deployer::new(
                &self.settings.git_dir,
                self.settings.build_deploy_dir(),
                &self.settings.start_directory,
            );
            for (index, artefact) in artefacts.iter().enumerate() {
                tracing::info!("Processing deploy artefact #{}", index + 1);
                report.files_deployed += deployer.deploy(artefact).await?;
            }
        }

        if let Some(steps) = instructions.run.as_ref().filter(|_| !self.settings.no_run) {
            self.progress.mark(Stage::StartingInstance);
            report.steps = self.start_instance(steps).await?;
        }

        Ok(report)
    }

    /// Wipe checkouts (unless `no_clean`), create the deploy root, recreate
    /// the build deploy directory.
    async fn prepare_folders(&self) -> Result<(), BuildError> {
        let git_dir = &self.settings.git_dir;
        if git_dir.is_dir() {
            if self.settings.no_clean {
                tracing::info!("Github folder already exists and is left as-is");
            } else {
                tracing::info!("Removing existing github repos in {}", git_dir.display());
                remove_dir(git_dir).await?;
            }
        }
        create_dir(git_dir).await?;
        create_dir(&self.settings.deploy_dir).await?;

        let build_dir = self.settings.build_deploy_dir();
        if build_dir.is_dir() {
            remove_dir(&build_dir).await?;
        }
        create_dir(&build_dir).await
    }

    /// Returns `false` if the repository was skipped
    async fn build_repository(&self, repository: &RepositoryBuild) -> Result<bool, BuildError> {
        let name = repository.name();
        tracing::info!("Started building repo {} @ [{}] ...", name, repository.repo);

        let checkout = self.settings.git_dir.join(name);
        if checkout.is_dir() {
            tracing::info!("Checkout {} already exists, reusing it", checkout.display());
        } else {
            create_dir(&checkout).await?;
            if let Err(e) = self
                .vcs
                .clone_branch(&repository.repo, &repository.branch, &checkout)
                .await
            {
                return skip_or_fail(repository, e);
            }
            tracing::info!(
                "Successfully cloned and checked out branch [{}] for repo {}",
                repository.branch,
                name
            );
        }

        let work_dir = match &repository.sub_dir {
            Some(sub_dir) => checkout.join(sub_dir),
            None => checkout,
        };
        let log_file = PathBuf::from(format!("build-{name}.log"));

        let status = shell(&repository.command, &work_dir, Some(&log_file))?
            .status()
            .await
            .map_err(|e| BuildError::io(format!("running build command for {name}"), e))?;

        if !status.success() {
            return skip_or_fail(
                repository,
                BuildError::BuildFailed {
                    repo: name.to_string(),
                    status: describe(status),
                },
            );
        }

        tracing::info!("-> Finished building repo {}.", name);
        Ok(true)
    }

    async fn start_instance(&self, steps: &[RunStep]) -> Result<Vec<StepOutcome>, BuildError> {
        tracing::info!("==> Starting an instance of the {} project...", self.settings.build_name);

        let build_dir = self.settings.build_deploy_dir();
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut running = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            tracing::info!("Executing step #{}", index + 1);

            let exec_dir = if let Some(dir) = &step.directory {
                build_dir.join(dir)
            } else {
                find_dir_by_regexp(&build_dir, step.directory_re.as_deref())?
            };
            if !exec_dir.is_dir() {
                return Err(BuildError::MissingWorkDir {
                    dir: exec_dir,
                    command: step.command.clone(),
                });
            }
            tracing::info!("Working directory [{}]", exec_dir.display());

            let redirect = step.stdout_redirect_file.as_deref().map(std::path::Path::new);
            let mut cmd = shell(&step.command, &exec_dir, redirect)?;

            if step.detach {
                tracing::info!("-> Starting detached [{}]", step.command);
                let child = cmd
                    .spawn()
                    .map_err(|e| BuildError::io(format!("starting [{}]", step.command), e))?;
                tracing::info!("-> <------ DETACHED, PID = [{}] ------>", child.id().unwrap_or_default());
                outcomes.push(StepOutcome {
                    command: step.command.clone(),
                    exit_code: None,
                });
            } else if step.run_and_proceed {
                tracing::info!("-> Starting [{}]", step.command);
                let child = cmd
                    .spawn()
                    .map_err(|e| BuildError::io(format!("starting [{}]", step.command), e))?;
                tracing::info!("-> <------ STARTED, PID = [{}] ------>", child.id().unwrap_or_default());
                running.push((outcomes.len(), child));
                outcomes.push(StepOutcome {
                    command: step.command.clone(),
                    exit_code: None,
                });
            } else {
                tracing::info!("-> Running [{}]", step.command);
                let status = cmd
                    .status()
                    .await
                    .map_err(|e| BuildError::io(format!("running [{}]", step.command), e))?;
                tracing::info!("-> Finished ({})", describe(status));
                outcomes.push(StepOutcome {
                    command: step.command.clone(),
                    exit_code: status.code(),
                });
            }
        }

        if !running.is_empty() {
            tracing::info!("-> Waiting for {} processes to finish...", running.len());
            let mut codes = Vec::with_capacity(running.len());
            for (slot, mut child) in running {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| BuildError::io("waiting for background process", e))?;
                outcomes[slot].exit_code = status.code();
                codes.push(describe(status));
            }
            tracing::info!("-> Done. Retcodes: [{}]", codes.join(", "));
        }

        tracing::info!("All done ===============================");
        Ok(outcomes)
    }
}

fn skip_or_fail(repository: &RepositoryBuild, error: BuildError) -> Result<bool, BuildError> {
    if repository.continue_on_fail {
        tracing::error!("Error: {} (continuing)", error);
        Ok(false)
    } else {
        Err(error)
    }
}

async fn create_dir(dir: &std::path::Path) -> Result<(), BuildError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BuildError::io(format!("creating {}", dir.display()), e))
}

async fn remove_dir(dir: &std::path::Path) -> Result<(), BuildError> {
    tokio::fs::remove_dir_all(dir)
        .await
        .map_err(|e| BuildError::io(format!("removing {}", dir.display()), e))
}
