//! PhenomeCentral preset
//!
//! Builds the three PhenomeCentral repositories from chosen branches, unpacks
//! the standalone distribution and optionally starts it. The preset only
//! produces [`BuildInstructions`]; the regular [`Pipeline`](crate::Pipeline)
//! executes them.

use pcd_core::{
    BuildInstructions, DeployAction, DeployArtefact, RepositoryBuild, RunStep, SourceFiles,
    VmMetadata,
};
use serde::{Deserialize, Serialize};

/// Repository names, in build order
pub const REPOSITORIES: [&str; 3] = ["patient-network", "remote-matching", "phenomecentral.org"];

/// VM metadata key with the patient-network branch
pub const PATIENT_NETWORK_KEY: &str = "pn";
/// VM metadata key with the remote-matching branch
pub const REMOTE_MATCHING_KEY: &str = "rm";
/// VM metadata key with the phenomecentral.org branch
pub const PHENOMECENTRAL_KEY: &str = "pc";
/// VM metadata key with the build name
pub const BUILD_NAME_KEY: &str = "bn";

/// Preset configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// URL prefix the repository names are appended to
    pub github_url: String,
    /// Build command run in every checkout
    pub build_command: String,
    /// Branch used when none is given
    pub default_branch: String,
    /// Directory holding the distribution, relative to the git directory
    pub distribution_dir: String,
    /// Distribution archive name (wildcards allowed)
    pub distribution_archive: String,
    /// Command starting the unpacked instance
    pub start_command: String,
    /// File receiving the instance output
    pub start_output: String,
    /// URL requested once the instance is up, to trigger its start-up
    pub instance_url: String,
    /// Seconds to wait before the warm-up request
    pub warmup_delay_secs: u64,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            github_url: "https://github.com/phenotips/".to_string(),
            build_command: "mvn clean install -Pquick".to_string(),
            default_branch: "master".to_string(),
            distribution_dir: "phenomecentral.org/standalone/target".to_string(),
            distribution_archive: "phenomecentral-standalone*.zip".to_string(),
            start_command: "./start.sh".to_string(),
            start_output: "stdout.txt".to_string(),
            instance_url: "http://localhost:8080".to_string(),
            warmup_delay_secs: 30,
        }
    }
}

/// Branch per repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branches {
    /// patient-network
    pub patient_network: String,
    /// remote-matching
    pub remote_matching: String,
    /// phenomecentral.org
    pub phenomecentral: String,
}

impl Branches {
    /// Same branch everywhere
    #[must_use]
    pub fn uniform(branch: &str) -> Self {
        Self {
            patient_network: branch.to_string(),
            remote_matching: branch.to_string(),
            phenomecentral: branch.to_string(),
        }
    }

    /// Branches in [`REPOSITORIES`] order
    #[must_use]
    pub fn in_build_order(&self) -> [&str; 3] {
        [&self.patient_network, &self.remote_matching, &self.phenomecentral]
    }
}

/// A PhenomeCentral build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhenomeCentralBuild {
    /// Branch per repository
    pub branches: Branches,
    /// Effective build name
    pub build_name: String,
    /// Start the instance after deploying
    pub start: bool,
}

impl PhenomeCentralBuild {
    /// Defaults from VM metadata (`pn`, `rm`, `pc`, `bn`), else the default branch.
    #[must_use]
    pub fn defaults_from_metadata(metadata: &VmMetadata, config: &PresetConfig) -> (Branches, String) {
        let pick = |key: &str| {
            metadata
                .get(key)
                .cloned()
                .unwrap_or_else(|| config.default_branch.clone())
        };
        let branches = Branches {
            patient_network: pick(PATIENT_NETWORK_KEY),
            remote_matching: pick(REMOTE_MATCHING_KEY),
            phenomecentral: pick(PHENOMECENTRAL_KEY),
        };
        (branches, pick(BUILD_NAME_KEY))
    }

    /// Create a build request.
    ///
    /// When `build_name` is the default branch name and any branch differs
    /// from it, the build is named `<pn>_<rm>_<pc>` instead.
    #[must_use]
    pub fn new(branches: Branches, build_name: &str, start: bool, config: &PresetConfig) -> Self {
        let default = config.default_branch.as_str();
        let custom_branches = branches.in_build_order().iter().any(|b| *b != default);

        let build_name = if build_name == default && custom_branches {
            branches.in_build_order().join("_")
        } else {
            build_name.to_string()
        };

        Self {
            branches,
            build_name,
            start,
        }
    }

    /// Instructions for the pipeline
    #[must_use]
    pub fn to_instructions(&self, config: &PresetConfig) -> BuildInstructions {
        let build = REPOSITORIES
            .iter()
            .zip(self.branches.in_build_order())
            .map(|(repo, branch)| {
                RepositoryBuild::new(format!("{}{}", config.github_url, repo), branch, &config.build_command)
            })
            .collect();

        let deploy = vec![DeployArtefact::new(
            DeployAction::Unzip,
            &config.distribution_dir,
            SourceFiles::One(config.distribution_archive.clone()),
        )];

        // the archive unpacks into a single versioned directory
        let run = self.start.then(|| {
            vec![
                RunStep::new(&config.start_command)
                    .with_directory_re(".")
                    .with_redirect(&config.start_output)
                    .detached(),
                RunStep::new(format!(
                    "sleep {} && curl -s -o /dev/null {}",
                    config.warmup_delay_secs, config.instance_url
                ))
                .with_directory_re("."),
            ]
        });

        BuildInstructions {
            build: Some(build),
            deploy: Some(deploy),
            run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_branches_keep_default_name() {
        let config = PresetConfig::default();
        let build = PhenomeCentralBuild::new(Branches::uniform("master"), "master", false, &config);
        assert_eq!(build.build_name, "master");
    }

    #[test]
    fn custom_branch_derives_build_name() {
        let config = PresetConfig::default();
        let branches = Branches {
            patient_network: "PN-12".to_string(),
            remote_matching: "master".to_string(),
            phenomecentral: "PC-7".to_string(),
        };

        let build = PhenomeCentralBuild::new(branches.clone(), "master", false, &config);
        assert_eq!(build.build_name, "PN-12_master_PC-7");

        let named = PhenomeCentralBuild::new(branches, "release", false, &config);
        assert_eq!(named.build_name, "release");
    }

    #[test]
    fn metadata_supplies_defaults() {
        let config = PresetConfig::default();
        let metadata: VmMetadata = [("pc", "PC-9"), ("bn", "qa")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let (branches, build_name) = PhenomeCentralBuild::defaults_from_metadata(&metadata, &config);

        assert_eq!(branches.phenomecentral, "PC-9");
        assert_eq!(branches.patient_network, "master");
        assert_eq!(build_name, "qa");
    }

    #[test]
    fn instructions_cover_three_repositories() {
        let config = PresetConfig::default();
        let build = PhenomeCentralBuild::new(Branches::uniform("master"), "master", false, &config);

        let instructions = build.to_instructions(&config);

        let repos: Vec<_> = instructions.repositories().iter().map(RepositoryBuild::name).collect();
        assert_eq!(repos, REPOSITORIES.to_vec());
        assert_eq!(
            instructions.repositories()[0].repo,
            "https://github.com/phenotips/patient-network"
        );
        assert_eq!(instructions.artefacts()[0].action, DeployAction::Unzip);
        assert!(instructions.run.is_none());
    }

    #[test]
    fn start_adds_run_steps() {
        let config = PresetConfig::default();
        let build = PhenomeCentralBuild::new(Branches::uniform("master"), "master", true, &config);

        let run = build.to_instructions(&config).run.unwrap();

        assert_eq!(run.len(), 2);
        assert!(run[0].detach);
        assert!(!run[0].run_and_proceed);
        assert!(!run[1].detach);
        assert_eq!(run[0].stdout_redirect_file.as_deref(), Some("stdout.txt"));
        assert!(run[1].command.contains("http://localhost:8080"));
    }
}
