//! Cloud settings and credentials

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloud settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// Snapshot image new VMs boot from
    pub snapshot_name: String,
    /// Flavor of new VMs
    pub flavor_name: String,
    /// Keypair injected into new VMs
    pub keypair_name: String,
    /// Network the VMs are attached to
    pub network_name: String,
    /// Network floating IPs are allocated from
    pub external_network_name: String,
    /// Security groups of new VMs; missing ones are skipped
    pub security_groups: Vec<String>,
    /// Servers whose names start with this prefix are not build VMs
    pub excluded_name_prefix: String,
    /// File receiving the JSON server report
    pub server_list_file: String,
    /// Seconds between status polls
    pub wait_interval_secs: u64,
    /// Seconds before a start or delete is considered failed
    pub wait_timeout_secs: u64,
    /// HTTP request timeout, seconds
    pub request_timeout_secs: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            snapshot_name: "PC_deployment_base_v2".to_string(),
            flavor_name: "m2.medium".to_string(),
            keypair_name: "PCMain".to_string(),
            network_name: "TestPC".to_string(),
            external_network_name: "Kidnet External".to_string(),
            security_groups: vec![
                "default".to_string(),
                "ingress_cidr_local_tcp_8080".to_string(),
                "ingress_cidr_local_tcp_8090".to_string(),
            ],
            excluded_name_prefix: "PC_deployment".to_string(),
            server_list_file: "server_list.txt".to_string(),
            wait_interval_secs: 30,
            wait_timeout_secs: 1200,
            request_timeout_secs: 60,
        }
    }
}

impl CloudSettings {
    /// Override polling cadence
    #[inline]
    #[must_use]
    pub fn with_wait(mut self, interval_secs: u64, timeout_secs: u64) -> Self {
        self.wait_interval_secs = interval_secs;
        self.wait_timeout_secs = timeout_secs;
        self
    }

    /// Override the server report file
    #[inline]
    #[must_use]
    pub fn with_server_list_file(mut self, file: impl Into<String>) -> Self {
        self.server_list_file = file.into();
        self
    }

    /// Pause between status polls
    #[inline]
    #[must_use]
    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }

    /// Give up waiting for a server status after this long
    #[inline]
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Timeout of a single API request
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// OpenStack credentials from the usual `OS_*` environment
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// `OS_AUTH_URL`
    pub auth_url: String,
    /// `OS_USERNAME`
    pub username: String,
    /// `OS_PASSWORD`
    pub password: String,
    /// `OS_PROJECT_NAME`
    pub project_name: String,
    /// `OS_USER_DOMAIN_NAME`
    pub user_domain_name: String,
    /// `OS_PROJECT_DOMAIN_NAME`
    pub project_domain_name: String,
    /// `OS_REGION_NAME`
    pub region_name: Option<String>,
    /// `OS_IDENTITY_API_VERSION`
    pub identity_api_version: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region_name", &self.region_name)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MissingCredential`] naming the first unset variable.
    pub fn from_env() -> Result<Self, CloudError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MissingCredential`] naming the first unset variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CloudError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(CloudError::MissingCredential(name))
        };

        let credentials = Self {
            auth_url: required("OS_AUTH_URL")?,
            username: required("OS_USERNAME")?,
            password: required("OS_PASSWORD")?,
            project_name: required("OS_PROJECT_NAME")?,
            user_domain_name: required("OS_USER_DOMAIN_NAME")?,
            project_domain_name: required("OS_PROJECT_DOMAIN_NAME")?,
            region_name: lookup("OS_REGION_NAME").filter(|v| !v.is_empty()),
            identity_api_version: lookup("OS_IDENTITY_API_VERSION").filter(|v| !v.is_empty()),
        };

        tracing::info!(
            "Using OpenStack credentials of user {} at {}",
            credentials.username,
            credentials.auth_url
        );
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment() -> HashMap<&'static str, String> {
        [
            ("OS_AUTH_URL", "https://cloud.example.org:5000/v3"),
            ("OS_USERNAME", "deployer"),
            ("OS_PASSWORD", "s3cret"),
            ("OS_PROJECT_NAME", "pc"),
            ("OS_USER_DOMAIN_NAME", "Default"),
            ("OS_PROJECT_DOMAIN_NAME", "Default"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    #[test]
    fn reads_credentials() {
        let env = environment();
        let credentials = Credentials::from_lookup(|name| env.get(name).cloned()).unwrap();

        assert_eq!(credentials.username, "deployer");
        assert_eq!(credentials.region_name, None);
        assert!(!format!("{credentials:?}").contains("s3cret"));
    }

    #[test]
    fn missing_variable_is_named() {
        let mut env = environment();
        env.remove("OS_PASSWORD");

        let err = Credentials::from_lookup(|name| env.get(name).cloned()).unwrap_err();
        assert!(matches!(err, CloudError::MissingCredential("OS_PASSWORD")));
    }

    #[test]
    fn default_settings() {
        let settings = CloudSettings::default();
        assert_eq!(settings.security_groups.len(), 3);
        assert_eq!(settings.wait_timeout(), Duration::from_secs(1200));

        let parsed: CloudSettings = serde_json::from_str(r#"{"flavor_name": "m1.large"}"#).unwrap();
        assert_eq!(parsed.flavor_name, "m1.large");
        assert_eq!(parsed.network_name, "TestPC");
    }
}
