use crate::error::BuildError;
use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// `sh -c <command>` in `dir`, output optionally sent to `redirect`
pub(crate) fn shell(command: &str, dir: &Path, redirect: Option<&Path>) -> Result<Command, BuildError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(dir);
    if let Some(path) = redirect {
        redirect_output(&mut cmd, &dir.join(path))?;
    }
    Ok(cmd)
}

/// Send stdout and stderr of `cmd` to a freshly truncated `path`
pub(crate) fn redirect_output(cmd: &mut Command, path: &Path) -> Result<(), BuildError> {
    let stdout = File::create(path)
        .map_err(|e| BuildError::io(format!("creating output file {}", path.display()), e))?;
    let stderr = stdout
        .try_clone()
        .map_err(|e| BuildError::io(format!("duplicating handle of {}", path.display()), e))?;
    cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
    Ok(())
}

pub(crate) fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("retcode {code}"),
        None => "terminated by signal".to_string(),
    }
}
