//! pcdeploy - build VMs, builds and test data for PhenomeCentral deployments

mod cli;
mod commands;
mod config;

use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli::command().get_matches();

    let config = match AppConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match commands::run(&matches, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.before_logging() {
                eprintln!("Error: {e}");
            } else {
                tracing::error!("Error: {}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}
