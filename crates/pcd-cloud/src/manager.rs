//! Build VM management: deploy, delete and list

use crate::api::CloudApi;
use crate::config::CloudSettings;
use crate::error::CloudError;
use crate::model::{NewServer, Server, STATUS_ACTIVE, STATUS_BUILD, STATUS_ERROR};
use pcd_core::metadata::{compose_vm_metadata, merge_instruction_chunks};
use pcd_core::VmMetadata;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// IP reported for servers without an address on the deployment network
pub const NOT_ASSIGNED: &str = "not assigned";

/// One build server in a [`ServerReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    /// Server id
    pub id: String,
    /// Server name
    pub name: String,
    /// Floating IP, empty if none, [`NOT_ASSIGNED`] if off-network
    pub ip: String,
    /// Creation timestamp
    pub created: Option<String>,
    /// VM state (`active`, `building`, ...)
    pub status: Option<String>,
    /// Metadata with instruction chunks merged
    pub metadata: VmMetadata,
}

/// Build servers and project usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerReport {
    /// Build servers on the deployment network
    pub servers: Vec<ServerSummary>,
    /// Absolute limits (RAM in GiB) plus `requiredRAM`, `requiredCores` and
    /// `requiredDisc` of one build VM
    pub usage: serde_json::Map<String, Value>,
}

/// VM manager over a [`CloudApi`]
#[derive(Debug)]
pub struct VmManager<C> {
    api: C,
    settings: CloudSettings,
}

impl<C: CloudApi> VmManager<C> {
    /// Manager over `api` using `settings`
    #[must_use]
    pub fn new(api: C, settings: CloudSettings) -> Self {
        Self { api, settings }
    }

    /// Get cloud API
    #[inline]
    #[must_use]
    pub fn api(&self) -> &C {
        &self.api
    }

    /// Get settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &CloudSettings {
        &self.settings
    }

    /// Start a build VM carrying `instructions` in its metadata.
    ///
    /// A running server with the same name is deleted first.
    ///
    /// # Errors
    ///
    /// - [`CloudError::NoBuildName`] if `build_name` is empty
    /// - [`CloudError::ServerStartFailed`] if the server does not become active
    /// - [`CloudError::FloatingIp`] if no floating IP can be attached
    pub async fn deploy(&self, build_name: &str, instructions: &str) -> Result<Server, CloudError> {
        if build_name.is_empty() {
            return Err(CloudError::NoBuildName);
        }

        self.delete(build_name).await?;
        let server = self.start_server(build_name, instructions).await?;
        let address = self.attach_floating_ip(&server).await?;

        tracing::info!("VM {} is running, available at {}", build_name, address);
        Ok(server)
    }

    /// Delete the server named `build_name` and wait until it is gone.
    ///
    /// Returns whether a server was removed.
    ///
    /// # Errors
    ///
    /// Fails on an empty name, an API error, or when the server survives the
    /// wait timeout.
    pub async fn delete(&self, build_name: &str) -> Result<bool, CloudError> {
        if build_name.is_empty() {
            return Err(CloudError::NoBuildName);
        }

        let Some(server) = self.api.find_server(build_name).await? else {
            tracing::info!("No VM named {} found", build_name);
            return Ok(false);
        };

        tracing::info!("Deleting VM {} ({})", build_name, server.id);
        self.api.delete_server(&server.id).await?;
        self.wait_for_delete(&server.id).await?;
        tracing::info!("VM {} deleted", build_name);
        Ok(true)
    }

    /// Report build servers and usage.
    ///
    /// # Errors
    ///
    /// Fails on API errors or when the deployment flavor does not exist.
    pub async fn list(&self) -> Result<ServerReport, CloudError> {
        let network = self.settings.network_name.as_str();
        let mut servers = Vec::new();

        for server in self.api.list_servers().await? {
            if server.status != STATUS_BUILD && !server.is_on_network(network) {
                tracing::debug!("Skipping {}: not on network {}", server.name, network);
                continue;
            }
            if server.name.starts_with(&self.settings.excluded_name_prefix) {
                tracing::debug!("Skipping {}: excluded name", server.name);
                continue;
            }
            servers.push(self.summarize(server));
        }

        let usage = self.usage().await?;
        tracing::info!("{} build servers found", servers.len());
        Ok(ServerReport { servers, usage })
    }

    /// Write `report` as JSON into `dir`, returning the file path.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Io`] if the file cannot be written.
    pub fn write_report(&self, report: &ServerReport, dir: &Path) -> Result<PathBuf, CloudError> {
        let path = dir.join(&self.settings.server_list_file);
        let body = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, body).map_err(|source| CloudError::Io {
            context: format!("writing {}", path.display()),
            source,
        })?;
        tracing::info!("Server list written to {}", path.display());
        Ok(path)
    }

    fn summarize(&self, server: Server) -> ServerSummary {
        let network = self.settings.network_name.as_str();
        let ip = if server.is_on_network(network) {
            server.floating_ip(network).unwrap_or_default().to_string()
        } else {
            NOT_ASSIGNED.to_string()
        };

        let metadata = match merge_instruction_chunks(server.metadata.clone()) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!("Metadata of {} left unmerged: {}", server.name, e);
                server.metadata
            }
        };

        ServerSummary {
            id: server.id,
            name: server.name,
            ip,
            created: server.created,
            status: server.vm_state,
            metadata,
        }
    }

    async fn usage(&self) -> Result<serde_json::Map<String, Value>, CloudError> {
        let mut usage = self.api.absolute_limits().await?;
        for key in ["totalRAMUsed", "maxTotalRAMSize"] {
            if let Some(mib) = usage.get(key).and_then(Value::as_f64) {
                usage.insert(key.to_string(), json!(mib_to_gib(mib)));
            }
        }

        let flavor_name = &self.settings.flavor_name;
        let flavor = self
            .api
            .find_flavor(flavor_name)
            .await?
            .ok_or_else(|| CloudError::NotFound {
                kind: "flavor",
                name: flavor_name.clone(),
            })?;

        #[allow(clippy::cast_precision_loss)]
        let ram = mib_to_gib(flavor.ram as f64);
        usage.insert("requiredRAM".to_string(), json!(ram));
        usage.insert("requiredCores".to_string(), json!(flavor.vcpus));
        usage.insert("requiredDisc".to_string(), json!(flavor.disk));
        Ok(usage)
    }

    async fn start_server(&self, build_name: &str, instructions: &str) -> Result<Server, CloudError> {
        let request = self.server_request(build_name, instructions).await?;
        tracing::info!(
            "Starting VM {} from {} ({})",
            build_name,
            self.settings.snapshot_name,
            self.settings.flavor_name
        );

        let started = async {
            let created = self.api.create_server(&request).await?;
            self.wait_for_server(&created.id).await
        }
        .await;

        match started {
            Ok(server) => {
                tracing::info!("VM {} is active", build_name);
                Ok(server)
            }
            Err(e) => {
                tracing::error!("FAILED TO START A VM {}: {}", build_name, e);
                let status = match self.api.find_server(build_name).await {
                    Ok(Some(server)) => {
                        tracing::info!("VM {} status: {}", build_name, server.status);
                        Some(server.status)
                    }
                    Ok(None) => {
                        tracing::info!("VM {} does not exist", build_name);
                        None
                    }
                    Err(lookup) => {
                        tracing::warn!("Could not query VM {}: {}", build_name, lookup);
                        None
                    }
                };
                let reason = match e {
                    CloudError::ServerStartFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                Err(CloudError::ServerStartFailed {
                    name: build_name.to_string(),
                    status,
                    reason,
                })
            }
        }
    }

    async fn server_request(&self, build_name: &str, instructions: &str) -> Result<NewServer, CloudError> {
        let settings = &self.settings;
        let not_found = |kind: &'static str, name: &str| CloudError::NotFound {
            kind,
            name: name.to_string(),
        };

        let image_id = self
            .api
            .find_image(&settings.snapshot_name)
            .await?
            .ok_or_else(|| not_found("image", &settings.snapshot_name))?;
        let flavor = self
            .api
            .find_flavor(&settings.flavor_name)
            .await?
            .ok_or_else(|| not_found("flavor", &settings.flavor_name))?;
        let network_id = self
            .api
            .find_network(&settings.network_name)
            .await?
            .ok_or_else(|| not_found("network", &settings.network_name))?;
        let key_name = self
            .api
            .find_keypair(&settings.keypair_name)
            .await?
            .ok_or_else(|| not_found("keypair", &settings.keypair_name))?;

        let mut security_groups = Vec::with_capacity(settings.security_groups.len());
        for name in &settings.security_groups {
            match self.api.find_security_group(name).await? {
                Some(group) => security_groups.push(group),
                None => tracing::warn!("Security group {} not found, skipping", name),
            }
        }

        Ok(NewServer {
            name: build_name.to_string(),
            image_id,
            flavor_id: flavor.id,
            network_id,
            security_groups,
            key_name,
            metadata: compose_vm_metadata(build_name, instructions),
        })
    }

    async fn wait_for_server(&self, id: &str) -> Result<Server, CloudError> {
        let deadline = Instant::now() + self.settings.wait_timeout();
        loop {
            let server = self
                .api
                .get_server(id)
                .await?
                .ok_or_else(|| CloudError::NotFound {
                    kind: "server",
                    name: id.to_string(),
                })?;

            if server.status == STATUS_ACTIVE {
                return Ok(server);
            }
            if server.status == STATUS_ERROR {
                return Err(CloudError::ServerStartFailed {
                    name: server.name,
                    status: Some(server.status),
                    reason: "server entered ERROR state".to_string(),
                });
            }
            tracing::info!("Waiting for VM {} (status {})", server.name, server.status);

            if Instant::now() >= deadline {
                return Err(CloudError::ServerStartFailed {
                    name: server.name,
                    status: Some(server.status),
                    reason: format!("not active after {} s", self.settings.wait_timeout_secs),
                });
            }
            tokio::time::sleep(self.settings.wait_interval()).await;
        }
    }

    async fn wait_for_delete(&self, id: &str) -> Result<(), CloudError> {
        let deadline = Instant::now() + self.settings.wait_timeout();
        while self.api.get_server(id).await?.is_some() {
            if Instant::now() >= deadline {
                return Err(CloudError::DeleteTimeout(id.to_string()));
            }
            tracing::debug!("Waiting for server {} to disappear", id);
            tokio::time::sleep(self.settings.wait_interval()).await;
        }
        Ok(())
    }

    async fn attach_floating_ip(&self, server: &Server) -> Result<String, CloudError> {
        let attach = async {
            let ip = match self.api.find_available_floating_ip().await? {
                Some(ip) => ip,
                None => {
                    let external = &self.settings.external_network_name;
                    tracing::info!("No free floating IP, allocating one from {}", external);
                    let network_id = self.api.find_network(external).await?.ok_or_else(|| {
                        CloudError::NotFound {
                            kind: "network",
                            name: external.clone(),
                        }
                    })?;
                    self.api.create_floating_ip(&network_id).await?
                }
            };
            self.api.associate_floating_ip(&ip, &server.id).await?;
            Ok::<_, CloudError>(ip.floating_ip_address)
        };

        attach.await.map_err(|e| match e {
            CloudError::FloatingIp(_) => e,
            other => CloudError::FloatingIp(other.to_string()),
        })
    }
}

/// MiB to whole GiB, halves rounded to even
#[allow(clippy::cast_possible_truncation)]
fn mib_to_gib(mib: f64) -> i64 {
    (mib / 1024.0).round_ties_even() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_mib_to_gib() {
        assert_eq!(mib_to_gib(4096.0), 4);
        assert_eq!(mib_to_gib(1536.0), 2);
        assert_eq!(mib_to_gib(1000.0), 1);
        assert_eq!(mib_to_gib(0.0), 0);
    }

    #[test]
    fn half_gib_rounds_to_even() {
        assert_eq!(mib_to_gib(2560.0), 2);
        assert_eq!(mib_to_gib(3584.0), 4);
        assert_eq!(mib_to_gib(512.0), 0);
    }
}
