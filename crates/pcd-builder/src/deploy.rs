//! Deploy phase
//!
//! Installs build artefacts from the checkouts into the build deploy
//! directory, either by extracting archives with `unzip` or by copying files.

use crate::error::BuildError;
use crate::process::{describe, redirect_output};
use pcd_core::{DeployAction, DeployArtefact};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Log file receiving `unzip` output, in the start directory
pub const UNZIP_LOG: &str = "unzip.log";

/// Installs deploy artefacts
#[derive(Debug, Clone)]
pub struct Deployer {
    git_dir: PathBuf,
    build_deploy_dir: PathBuf,
    log_dir: PathBuf,
}

impl Deployer {
    /// Deployer reading from `git_dir` and writing into `build_deploy_dir`
    #[must_use]
    pub fn new(
        git_dir: impl Into<PathBuf>,
        build_deploy_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            git_dir: git_dir.into(),
            build_deploy_dir: build_deploy_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Install every file of `artefact`, returning how many were installed.
    ///
    /// With `continue_on_fail` a failing file is logged and skipped.
    ///
    /// # Errors
    /// Fails if the source directory is missing, the target cannot be
    /// created, or a file fails without `continue_on_fail`.
    pub async fn deploy(&self, artefact: &DeployArtefact) -> Result<usize, BuildError> {
        let source_dir = self.git_dir.join(&artefact.source_dir);
        if !source_dir.is_dir() {
            return Err(BuildError::MissingSource(source_dir));
        }

        let mut target_dir =
            find_dir_by_regexp(&self.build_deploy_dir, artefact.target_dir_re.as_deref())?;
        if let Some(sub_dir) = artefact.target_sub_dir.as_deref().filter(|s| !s.is_empty()) {
            target_dir = target_dir.join(sub_dir);
        }
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| BuildError::io(format!("creating {}", target_dir.display()), e))?;

        let mut installed = 0;
        for file in artefact.source_files.iter() {
            let result = match artefact.action {
                DeployAction::Unzip => self.unzip(&source_dir, file, &target_dir).await,
                DeployAction::Copy => copy_matching(&source_dir, file, &target_dir).await,
            };

            match result {
                Ok(count) => installed += count,
                Err(e) if artefact.continue_on_fail => {
                    tracing::error!("Error: {} (continuing)", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(installed)
    }

    async fn unzip(&self, source_dir: &Path, file: &str, target_dir: &Path) -> Result<usize, BuildError> {
        let archive = source_dir.join(file);
        tracing::info!(
            "-> Deploying by unzipping files from {} to the target directory {} ...",
            archive.display(),
            target_dir.display()
        );

        let mut cmd = Command::new("unzip");
        // -o: overwrite without prompting
        cmd.arg("-o").arg(&archive).arg("-d").arg(target_dir);
        redirect_output(&mut cmd, &self.log_dir.join(UNZIP_LOG))?;

        let status = cmd
            .status()
            .await
            .map_err(|e| BuildError::io("running unzip", e))?;
        if !status.success() {
            return Err(BuildError::Unzip {
                archive,
                target: target_dir.to_path_buf(),
                status: describe(status),
            });
        }

        tracing::info!("-> Finished extracting files from {}", archive.display());
        Ok(1)
    }
}

async fn copy_matching(source_dir: &Path, pattern: &str, target_dir: &Path) -> Result<usize, BuildError> {
    tracing::info!(
        "-> Deploying by copying files from {} to the target directory {} ...",
        source_dir.join(pattern).display(),
        target_dir.display()
    );

    let files = expand_source_files(source_dir, pattern)?;
    if files.is_empty() {
        return Err(BuildError::NothingToCopy {
            pattern: source_dir.join(pattern),
            target: target_dir.to_path_buf(),
        });
    }

    for file in &files {
        let Some(name) = file.file_name() else { continue };
        tokio::fs::copy(file, target_dir.join(name))
            .await
            .map_err(|e| BuildError::io(format!("copying {} to {}", file.display(), target_dir.display()), e))?;
    }

    tracing::info!("-> Finished copying {} file(s) matching {}", files.len(), pattern);
    Ok(files.len())
}

/// First entry of `containing_dir` (in name order) whose name matches
/// `pattern` from its start.
///
/// An empty or absent pattern selects `containing_dir` itself; so does a
/// pattern with no match, after logging it.
///
/// # Errors
/// Fails if the pattern is not a valid regex or the directory cannot be read.
pub fn find_dir_by_regexp(containing_dir: &Path, pattern: Option<&str>) -> Result<PathBuf, BuildError> {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return Ok(containing_dir.to_path_buf());
    };
    let regex = Regex::new(&format!("^(?:{pattern})"))?;

    let mut names: Vec<String> = std::fs::read_dir(containing_dir)
        .map_err(|e| BuildError::io(format!("listing {}", containing_dir.display()), e))?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    if let Some(name) = names.iter().find(|name| regex.is_match(name)) {
        return Ok(containing_dir.join(name));
    }

    tracing::error!(
        "Directory [{}] not found in [{}]",
        pattern,
        containing_dir.display()
    );
    Ok(containing_dir.to_path_buf())
}

/// Files in `dir` matching a name that may contain `*` and `?` wildcards.
///
/// A name without wildcards is returned as-is if it exists.
///
/// # Errors
/// Fails if `dir` cannot be read.
pub fn expand_source_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, BuildError> {
    if !pattern.contains(['*', '?']) {
        let path = dir.join(pattern);
        return Ok(if path.exists() { vec![path] } else { Vec::new() });
    }

    let regex = wildcard_regex(pattern)?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| BuildError::io(format!("listing {}", dir.display()), e))?
        .filter_map(Result::ok)
        .filter(|entry| regex.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    Ok(files)
}

fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcd_core::SourceFiles;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"data").unwrap();
    }

    #[test]
    fn empty_pattern_selects_containing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_dir_by_regexp(dir.path(), None).unwrap(), dir.path());
        assert_eq!(find_dir_by_regexp(dir.path(), Some("")).unwrap(), dir.path());
    }

    #[test]
    fn pattern_is_anchored_at_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("old-phenomecentral")).unwrap();
        std::fs::create_dir(dir.path().join("phenomecentral-standalone-1.2")).unwrap();

        assert_eq!(
            find_dir_by_regexp(dir.path(), Some("phenomecentral")).unwrap(),
            dir.path().join("phenomecentral-standalone-1.2")
        );
    }

    #[test]
    fn no_match_falls_back_to_containing_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("other")).unwrap();
        assert_eq!(find_dir_by_regexp(dir.path(), Some("pc-")).unwrap(), dir.path());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_dir_by_regexp(dir.path(), Some("(")),
            Err(BuildError::Pattern(_))
        ));
    }

    #[test]
    fn wildcards_expand_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b-1.jar", "a-1.jar", "a-1.zip", "notes.txt"] {
            touch(&dir.path().join(name));
        }

        let files = expand_source_files(dir.path(), "?-1.jar").unwrap();
        assert_eq!(files, vec![dir.path().join("a-1.jar"), dir.path().join("b-1.jar")]);

        let files = expand_source_files(dir.path(), "a-1.*").unwrap();
        assert_eq!(files.len(), 2);

        assert!(expand_source_files(dir.path(), "missing.jar").unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_into_sub_dir_of_matched_target() {
        let root = tempfile::tempdir().unwrap();
        let git = root.path().join("github");
        let deploy = root.path().join("deploy").join("b");
        touch(&git.join("extra/lib-1.jar"));
        touch(&git.join("extra/lib-2.jar"));
        std::fs::create_dir_all(deploy.join("pc-standalone")).unwrap();

        let artefact = DeployArtefact::new(
            DeployAction::Copy,
            "extra",
            SourceFiles::One("lib-*.jar".to_string()),
        )
        .with_target_dir_re("pc-")
        .with_target_sub_dir("webapps/lib");

        let deployer = Deployer::new(&git, &deploy, root.path());
        assert_eq!(deployer.deploy(&artefact).await.unwrap(), 2);
        assert!(deploy.join("pc-standalone/webapps/lib/lib-1.jar").is_file());
        assert!(deploy.join("pc-standalone/webapps/lib/lib-2.jar").is_file());
    }

    #[tokio::test]
    async fn failed_copy_respects_continue_on_fail() {
        let root = tempfile::tempdir().unwrap();
        let git = root.path().join("github");
        let deploy = root.path().join("deploy");
        touch(&git.join("extra/present.jar"));

        let mut artefact = DeployArtefact::new(
            DeployAction::Copy,
            "extra",
            SourceFiles::Many(vec!["absent.jar".to_string(), "present.jar".to_string()]),
        );
        let deployer = Deployer::new(&git, &deploy, root.path());

        let err = deployer.deploy(&artefact).await.unwrap_err();
        assert!(matches!(err, BuildError::NothingToCopy { .. }));

        artefact.continue_on_fail = true;
        assert_eq!(deployer.deploy(&artefact).await.unwrap(), 1);
        assert!(deploy.join("present.jar").is_file());
    }

    #[tokio::test]
    async fn missing_source_dir_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let artefact = DeployArtefact::new(
            DeployAction::Unzip,
            "nowhere",
            SourceFiles::One("x.zip".to_string()),
        );
        let deployer = Deployer::new(root.path(), root.path().join("deploy"), root.path());

        assert!(matches!(
            deployer.deploy(&artefact).await,
            Err(BuildError::MissingSource(_))
        ));
    }
}
