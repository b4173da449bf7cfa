//! Configuration file
//!
//! Every section and field is optional; missing values keep their defaults.

use anyhow::Context;
use pcd_builder::BuilderConfig;
use pcd_cloud::CloudSettings;
use pcd_loader::LoaderSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) cloud: CloudSettings,
    pub(crate) builder: BuilderConfig,
    pub(crate) loader: LoaderSettings,
}

impl AppConfig {
    /// Parse TOML text
    pub(crate) fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Load `path`, or the defaults when no file is given
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(AppConfig::parse("").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            [cloud]
            flavor_name = "m1.large"
            wait_timeout_secs = 600

            [builder]
            default_build_name = "nightly"

            [builder.phenomecentral]
            default_branch = "develop"

            [loader]
            default_port = 9090
            "#,
        )
        .unwrap();

        assert_eq!(config.cloud.flavor_name, "m1.large");
        assert_eq!(config.cloud.wait_timeout_secs, 600);
        assert_eq!(config.cloud.snapshot_name, CloudSettings::default().snapshot_name);
        assert_eq!(config.builder.default_build_name, "nightly");
        assert_eq!(config.builder.phenomecentral.default_branch, "develop");
        assert_eq!(
            config.builder.phenomecentral.build_command,
            BuilderConfig::default().phenomecentral.build_command
        );
        assert_eq!(config.loader.default_port, 9090);
        assert_eq!(config.loader.username, "Admin");
    }

    #[test]
    fn unreadable_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcdeploy.toml");
        std::fs::write(&path, "[loader]\nusername = \"tester\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.loader.username, "tester");
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }
}
