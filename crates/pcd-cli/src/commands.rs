//! Subcommand handlers
//!
//! Each handler installs its own log files first, so everything it does ends
//! up in the log named after the action.

use crate::config::AppConfig;
use clap::ArgMatches;
use pcd_builder::{
    BuildError, BuildOverrides, BuildSettings, Branches, MetadataService, PhenomeCentralBuild,
    Pipeline, PipelineReport,
};
use pcd_cloud::{CloudError, Credentials, OpenStackClient, VmManager};
use pcd_core::instructions::read_instructions_file;
use pcd_core::{init_logging, InstructionsError, LogTargets, LoggingError};
use pcd_loader::{
    write_dataset_list, DatasetUploader, InstanceAddress, InstanceClient, LoadError,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mirror of the deploy log read by the web frontend
const LATEST_DEPLOY_LOG: &str = "latest_deploy_v2.log";

#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Instructions(#[from] InstructionsError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("unknown command {0}")]
    UnknownCommand(String),
}

impl CliError {
    #[must_use]
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Cloud(e) => e.exit_code(),
            Self::Build(e) => e.exit_code(),
            Self::Load(e) => e.exit_code(),
            Self::Instructions(_) | Self::Logging(_) | Self::UnknownCommand(_) => 1,
        }
    }

    /// Whether the error happened before log output was set up
    #[must_use]
    pub(crate) fn before_logging(&self) -> bool {
        matches!(self, Self::Logging(_) | Self::UnknownCommand(_))
    }
}

/// Dispatch the parsed command line.
pub(crate) async fn run(matches: &ArgMatches, config: AppConfig) -> Result<(), CliError> {
    match matches.subcommand() {
        Some(("vm", args)) => match args.subcommand() {
            Some(("deploy", args)) => vm_deploy(args, &config).await,
            Some(("delete", args)) => vm_delete(args, &config).await,
            Some(("list", _)) => vm_list(&config).await,
            other => Err(unknown("vm", other)),
        },
        Some(("build", args)) => build(args, &config).await,
        Some(("pc-build", args)) => pc_build(args, &config).await,
        Some(("data", args)) => match args.subcommand() {
            Some(("list", _)) => data_list(&config),
            Some(("upload", args)) => data_upload(args, &config).await,
            other => Err(unknown("data", other)),
        },
        other => Err(unknown("pcdeploy", other)),
    }
}

fn unknown(parent: &str, sub: Option<(&str, &ArgMatches)>) -> CliError {
    let name = sub.map_or("<none>", |(name, _)| name);
    CliError::UnknownCommand(format!("{parent} {name}"))
}

fn string_arg(args: &ArgMatches, id: &str) -> Option<String> {
    args.get_one::<String>(id).cloned()
}

fn path_arg(args: &ArgMatches, id: &str) -> Option<PathBuf> {
    args.get_one::<PathBuf>(id).cloned()
}

fn current_dir() -> Result<PathBuf, CliError> {
    std::env::current_dir()
        .map_err(|e| BuildError::io("reading current directory", e).into())
}

async fn vm_manager(config: &AppConfig) -> Result<VmManager<OpenStackClient>, CliError> {
    let credentials = Credentials::from_env()?;
    let client = OpenStackClient::connect_with_timeout(&credentials, config.cloud.request_timeout()).await?;
    Ok(VmManager::new(client, config.cloud.clone()))
}

async fn vm_deploy(args: &ArgMatches, config: &AppConfig) -> Result<(), CliError> {
    let build_name = string_arg(args, "build-name").unwrap_or_default();
    let log_folder = path_arg(args, "log-folder").unwrap_or_default();
    init_logging(
        &LogTargets::new(format!("openstack_{build_name}.log"))
            .with_mirror(log_folder.join(LATEST_DEPLOY_LOG)),
    )?;

    let file = path_arg(args, "build-instructions-file").unwrap_or_default();
    tracing::info!("Reading build instructions from {}", file.display());
    let instructions = read_instructions_file(&file)?;

    let manager = vm_manager(config).await?;
    let server = manager.deploy(&build_name, &instructions).await?;
    tracing::info!("Deployed VM {} ({})", server.name, server.id);
    Ok(())
}

async fn vm_delete(args: &ArgMatches, config: &AppConfig) -> Result<(), CliError> {
    init_logging(&LogTargets::new("openstack_delete.log"))?;
    let build_name = string_arg(args, "build-name").unwrap_or_default();

    let manager = vm_manager(config).await?;
    if !manager.delete(&build_name).await? {
        tracing::info!("Nothing to delete for build {}", build_name);
    }
    Ok(())
}

async fn vm_list(config: &AppConfig) -> Result<(), CliError> {
    init_logging(&LogTargets::new("openstack_list.log"))?;

    let manager = vm_manager(config).await?;
    let report = manager.list().await?;
    manager.write_report(&report, Path::new("."))?;
    Ok(())
}

async fn fetch_metadata(url: &str, config: &AppConfig) -> Result<pcd_core::VmMetadata, CliError> {
    let timeout = Duration::from_secs(config.builder.metadata_timeout_secs);
    Ok(MetadataService::new(url, timeout)?.fetch().await?)
}

/// Metadata, or empty metadata plus the reason when it could not be read
fn metadata_or_defaults(
    result: Result<pcd_core::VmMetadata, CliError>,
) -> (pcd_core::VmMetadata, Option<String>) {
    match result {
        Ok(metadata) => (metadata, None),
        Err(e) => (pcd_core::VmMetadata::new(), Some(e.to_string())),
    }
}

async fn build(args: &ArgMatches, config: &AppConfig) -> Result<(), CliError> {
    let start_directory = current_dir()?;
    init_logging(&LogTargets::new(start_directory.join("deploy.log")))?;

    let url = string_arg(args, "metadata-url").unwrap_or_else(|| config.builder.metadata_url.clone());
    let metadata = fetch_metadata(&url, config).await?;

    let overrides = BuildOverrides {
        build_name: string_arg(args, "build-name"),
        instructions_file: path_arg(args, "build-instructions-file"),
        git_dir: path_arg(args, "git-dir"),
        deploy_dir: path_arg(args, "deployment-dir"),
        no_clean: args.get_flag("no-clean"),
        no_run: args.get_flag("no-run"),
    };
    let settings = BuildSettings::resolve(overrides, &metadata, &config.builder, &start_directory)?;

    let report = Pipeline::new(settings).run().await?;
    log_report(&report);
    Ok(())
}

async fn pc_build(args: &ArgMatches, config: &AppConfig) -> Result<(), CliError> {
    let start_directory = current_dir()?;
    let preset = &config.builder.phenomecentral;

    // logging starts once the build name is known; a metadata failure is reported after that
    let (metadata, metadata_failure) =
        metadata_or_defaults(fetch_metadata(&config.builder.metadata_url, config).await);
    let (defaults, default_name) = PhenomeCentralBuild::defaults_from_metadata(&metadata, preset);
    let branches = Branches {
        patient_network: string_arg(args, "pn").unwrap_or(defaults.patient_network),
        remote_matching: string_arg(args, "rm").unwrap_or(defaults.remote_matching),
        phenomecentral: string_arg(args, "pc").unwrap_or(defaults.phenomecentral),
    };
    let build_name = string_arg(args, "build-name").unwrap_or(default_name);
    let request = PhenomeCentralBuild::new(branches, &build_name, args.get_flag("start"), preset);

    init_logging(&LogTargets::new(
        start_directory.join(format!("pc_deploy_{}.log", request.build_name)),
    ))?;
    if let Some(reason) = metadata_failure {
        tracing::warn!("Ignoring VM metadata, using default branches: {}", reason);
    }
    tracing::info!(
        "Building PhenomeCentral {} from branches PN [{}], RM [{}], PC [{}]",
        request.build_name,
        request.branches.patient_network,
        request.branches.remote_matching,
        request.branches.phenomecentral
    );

    let git_dir = path_arg(args, "git-dir").unwrap_or_else(|| config.builder.git_dir.clone());
    let deploy_dir = path_arg(args, "deployment-dir").unwrap_or_else(|| config.builder.deploy_dir.clone());
    let settings = BuildSettings::new(&request.build_name, request.to_instructions(preset), &start_directory)
        .with_git_dir(git_dir)
        .with_deploy_dir(deploy_dir);

    let report = Pipeline::new(settings).run().await?;
    log_report(&report);
    Ok(())
}

fn log_report(report: &PipelineReport) {
    tracing::info!(
        "Done: {} repositories built, {} run steps, {} ms",
        report.repositories_built.len(),
        report.steps.len(),
        report.execution_time_ms
    );
}

fn data_list(config: &AppConfig) -> Result<(), CliError> {
    init_logging(&LogTargets::new("dataset_list.log"))?;
    let settings = &config.loader;
    write_dataset_list(&settings.datasets_dir, &settings.datasets_list_file)?;
    Ok(())
}

async fn data_upload(args: &ArgMatches, config: &AppConfig) -> Result<(), CliError> {
    let settings = config.loader.clone();
    init_logging(&upload_log_targets(&settings.web_log_file))?;

    let host = string_arg(args, "ip").unwrap_or_default();
    let dataset = string_arg(args, "dataset-name").unwrap_or_default();
    let address = InstanceAddress::new(&host, args.get_flag("use-https"), settings.default_port);

    let client = InstanceClient::new(address, &settings)?;
    let report = DatasetUploader::new(client, settings).upload(&dataset).await?;
    if !report.invalid_files.is_empty() {
        tracing::warn!("{} files skipped as invalid JSON", report.invalid_files.len());
    }
    Ok(())
}

/// `upload_data.log`, mirrored to `web_log` when its folder exists
fn upload_log_targets(web_log: &Path) -> LogTargets {
    let targets = LogTargets::new("upload_data.log");
    match web_log.parent() {
        Some(dir) if dir.is_dir() => targets.with_mirror(web_log),
        _ => targets,
    }
}
