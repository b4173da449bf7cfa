//! Loader settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Consents granted to every uploaded patient
pub const DEFAULT_CONSENTS: [&str; 5] = ["real", "genetic", "share_history", "share_images", "matching"];

/// Loader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Folder holding one sub-folder per dataset
    pub datasets_dir: PathBuf,
    /// XAR file name inside a dataset
    pub xar_file: String,
    /// File receiving the dataset list
    pub datasets_list_file: PathBuf,
    /// Port appended to addresses without one
    pub default_port: u16,
    /// Basic-auth user
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Consent ids granted to uploaded patients
    pub consents: Vec<String>,
    /// Mirror of the upload log served by the instance
    pub web_log_file: PathBuf,
    /// HTTP request timeout, seconds
    pub request_timeout_secs: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            datasets_dir: PathBuf::from("datasets"),
            xar_file: "dataset.xar".to_string(),
            datasets_list_file: PathBuf::from("datasets_list.txt"),
            default_port: 8080,
            username: "Admin".to_string(),
            password: "admin".to_string(),
            consents: DEFAULT_CONSENTS.iter().map(ToString::to_string).collect(),
            web_log_file: PathBuf::from("webapps/phenotips/resources/latest_data_upload.log"),
            request_timeout_secs: 300,
        }
    }
}

impl LoaderSettings {
    /// With datasets folder
    #[inline]
    #[must_use]
    pub fn with_datasets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datasets_dir = dir.into();
        self
    }

    /// With instance credentials
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// HTTP request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
