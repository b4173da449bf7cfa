//! Testing utilities for the pcdeploy workspace
//!
//! Fakes for the checkout and cloud seams, plus dataset fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pcd_builder::{BuildError, Vcs};
use pcd_cloud::model::{STATUS_ACTIVE, STATUS_BUILD, STATUS_ERROR};
use pcd_cloud::{AbsoluteLimits, CloudApi, CloudError, Flavor, FloatingIp, NewServer, Server, ServerAddress};
use pcd_core::VmMetadata;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Instructions building one repository, copying a jar and running `echo`
pub const SAMPLE_INSTRUCTIONS: &str = r#"{
    "build": [
        {"repo": "https://github.com/example/widget", "branch": "main", "command": "mkdir -p target && echo built > target/widget.jar"}
    ],
    "deploy": [
        {"action": "copy", "source_dir": "widget/target", "source_files": "*.jar"}
    ],
    "run": [
        {"command": "echo started", "stdout_redirect_file": "run.log"}
    ]
}"#;

pub fn metadata<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> VmMetadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A recorded clone request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    pub branch: String,
    pub dest: PathBuf,
}

/// [`Vcs`] that fills the destination with fixed files instead of cloning
#[derive(Debug, Default)]
pub struct FakeVcs {
    files: Vec<(String, String)>,
    failing: BTreeSet<String>,
    clones: Mutex<Vec<CloneRequest>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `contents` to `relative_path` in every checkout
    #[must_use]
    pub fn with_file(mut self, relative_path: &str, contents: &str) -> Self {
        self.files.push((relative_path.to_string(), contents.to_string()));
        self
    }

    /// Fail clones of `url`
    #[must_use]
    pub fn failing_for(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn clones(&self) -> Vec<CloneRequest> {
        self.clones.lock().clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), BuildError> {
        self.clones.lock().push(CloneRequest {
            url: url.to_string(),
            branch: branch.to_string(),
            dest: dest.to_path_buf(),
        });

        if self.failing.contains(url) {
            return Err(BuildError::Clone {
                repo: url.to_string(),
                branch: branch.to_string(),
                message: "remote branch not found".to_string(),
            });
        }

        for (relative, contents) in &self.files {
            let path = dest.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BuildError::io("fake checkout", e))?;
            }
            std::fs::write(&path, contents).map_err(|e| BuildError::io("fake checkout", e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CloudState {
    servers: BTreeMap<String, Server>,
    /// Remaining `BUILD` polls per server id
    pending_polls: BTreeMap<String, usize>,
    created: Vec<NewServer>,
    deleted: Vec<String>,
    floating_ips: Vec<FloatingIp>,
    next_id: usize,
}

/// In-memory [`CloudApi`]
#[derive(Debug)]
pub struct FakeCloud {
    images: BTreeMap<String, String>,
    flavors: Vec<Flavor>,
    networks: BTreeMap<String, String>,
    keypairs: BTreeSet<String>,
    security_groups: BTreeSet<String>,
    limits: AbsoluteLimits,
    build_polls: usize,
    start_fails: bool,
    floating_ip_fails: bool,
    state: Mutex<CloudState>,
}

impl Default for FakeCloud {
    /// Cloud providing everything the default `CloudSettings` ask for
    fn default() -> Self {
        let mut limits = AbsoluteLimits::new();
        limits.insert("totalRAMUsed".to_string(), Value::from(10_240));
        limits.insert("maxTotalRAMSize".to_string(), Value::from(51_200));
        limits.insert("totalCoresUsed".to_string(), Value::from(4));
        limits.insert("maxTotalCores".to_string(), Value::from(20));

        Self {
            images: BTreeMap::from([("PC_deployment_base_v2".to_string(), "img-1".to_string())]),
            flavors: vec![Flavor {
                id: "fl-1".to_string(),
                name: "m2.medium".to_string(),
                ram: 4096,
                vcpus: 2,
                disk: 40,
            }],
            networks: BTreeMap::from([
                ("TestPC".to_string(), "net-1".to_string()),
                ("Kidnet External".to_string(), "ext-1".to_string()),
            ]),
            keypairs: BTreeSet::from(["PCMain".to_string()]),
            security_groups: BTreeSet::from([
                "default".to_string(),
                "ingress_cidr_local_tcp_8080".to_string(),
            ]),
            limits,
            build_polls: 1,
            start_fails: false,
            floating_ip_fails: false,
            state: Mutex::new(CloudState::default()),
        }
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Servers stay in `BUILD` for `polls` status queries
    #[must_use]
    pub fn with_build_polls(mut self, polls: usize) -> Self {
        self.build_polls = polls;
        self
    }

    /// New servers go to `ERROR` instead of `ACTIVE`
    #[must_use]
    pub fn with_failing_start(mut self) -> Self {
        self.start_fails = true;
        self
    }

    /// Floating IP association fails
    #[must_use]
    pub fn with_failing_floating_ip(mut self) -> Self {
        self.floating_ip_fails = true;
        self
    }

    #[must_use]
    pub fn without_image(mut self) -> Self {
        self.images.clear();
        self
    }

    /// Add an existing server
    #[must_use]
    pub fn with_server(self, server: Server) -> Self {
        self.state.lock().servers.insert(server.id.clone(), server);
        self
    }

    /// Add an allocated, unbound floating IP
    #[must_use]
    pub fn with_free_floating_ip(self, address: &str) -> Self {
        {
            let mut state = self.state.lock();
            let id = format!("fip-{}", state.floating_ips.len() + 1);
            state.floating_ips.push(FloatingIp {
                id,
                floating_ip_address: address.to_string(),
                port_id: None,
            });
        }
        self
    }

    pub fn servers(&self) -> Vec<Server> {
        self.state.lock().servers.values().cloned().collect()
    }

    pub fn created(&self) -> Vec<NewServer> {
        self.state.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state.lock().floating_ips.clone()
    }

    fn network_name(&self, id: &str) -> Option<&str> {
        self.networks
            .iter()
            .find(|(_, network_id)| network_id.as_str() == id)
            .map(|(name, _)| name.as_str())
    }
}

/// Server on `network` with optional floating address
pub fn server(id: &str, name: &str, network: Option<&str>, floating: Option<&str>) -> Server {
    let mut addresses = BTreeMap::new();
    if let Some(network) = network {
        let mut list = vec![ServerAddress {
            addr: "10.0.0.10".to_string(),
            ip_type: Some("fixed".to_string()),
        }];
        if let Some(ip) = floating {
            list.push(ServerAddress {
                addr: ip.to_string(),
                ip_type: Some("floating".to_string()),
            });
        }
        addresses.insert(network.to_string(), list);
    }

    Server {
        id: id.to_string(),
        name: name.to_string(),
        status: STATUS_ACTIVE.to_string(),
        vm_state: Some("active".to_string()),
        created: Some("2024-03-01T10:00:00Z".to_string()),
        addresses,
        metadata: VmMetadata::new(),
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn find_server(&self, name: &str) -> Result<Option<Server>, CloudError> {
        Ok(self
            .state
            .lock()
            .servers
            .values()
            .find(|server| server.name == name)
            .cloned())
    }

    async fn get_server(&self, id: &str) -> Result<Option<Server>, CloudError> {
        let mut state = self.state.lock();
        let remaining = state.pending_polls.get(id).copied();
        let Some(server) = state.servers.get_mut(id) else {
            return Ok(None);
        };

        match remaining {
            Some(0) => {
                let status = if self.start_fails { STATUS_ERROR } else { STATUS_ACTIVE };
                server.status = status.to_string();
                let server = server.clone();
                state.pending_polls.remove(id);
                Ok(Some(server))
            }
            Some(n) => {
                let server = server.clone();
                state.pending_polls.insert(id.to_string(), n - 1);
                Ok(Some(server))
            }
            None => Ok(Some(server.clone())),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>, CloudError> {
        Ok(self.servers())
    }

    async fn create_server(&self, request: &NewServer) -> Result<Server, CloudError> {
        let network = self.network_name(&request.network_id).unwrap_or("unknown").to_string();
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);

        let mut server = server(&id, &request.name, Some(&network), None);
        server.status = STATUS_BUILD.to_string();
        server.vm_state = Some("building".to_string());
        server.metadata = request.metadata.clone();

        state.servers.insert(id.clone(), server.clone());
        state.pending_polls.insert(id, self.build_polls);
        state.created.push(request.clone());
        Ok(server)
    }

    async fn delete_server(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.servers.remove(id);
        state.deleted.push(id.to_string());
        Ok(())
    }

    async fn find_image(&self, name: &str) -> Result<Option<String>, CloudError> {
        Ok(self.images.get(name).cloned())
    }

    async fn find_flavor(&self, name: &str) -> Result<Option<Flavor>, CloudError> {
        Ok(self.flavors.iter().find(|flavor| flavor.name == name).cloned())
    }

    async fn find_network(&self, name: &str) -> Result<Option<String>, CloudError> {
        Ok(self.networks.get(name).cloned())
    }

    async fn find_keypair(&self, name: &str) -> Result<Option<String>, CloudError> {
        Ok(self.keypairs.get(name).cloned())
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<String>, CloudError> {
        Ok(self.security_groups.get(name).cloned())
    }

    async fn find_available_floating_ip(&self) -> Result<Option<FloatingIp>, CloudError> {
        Ok(self
            .state
            .lock()
            .floating_ips
            .iter()
            .find(|ip| ip.port_id.is_none())
            .cloned())
    }

    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, CloudError> {
        if self.network_name(network_id).is_none() {
            return Err(CloudError::NotFound {
                kind: "network",
                name: network_id.to_string(),
            });
        }
        let mut state = self.state.lock();
        let index = state.floating_ips.len() + 1;
        let ip = FloatingIp {
            id: format!("fip-{index}"),
            floating_ip_address: format!("142.1.0.{index}"),
            port_id: None,
        };
        state.floating_ips.push(ip.clone());
        Ok(ip)
    }

    async fn associate_floating_ip(&self, ip: &FloatingIp, server_id: &str) -> Result<(), CloudError> {
        if self.floating_ip_fails {
            return Err(CloudError::Api {
                method: "PUT".to_string(),
                url: format!("/floatingips/{}", ip.id),
                status: 409,
                body: "port already bound".to_string(),
            });
        }

        let mut state = self.state.lock();
        let port = format!("port-{server_id}");
        if let Some(stored) = state.floating_ips.iter_mut().find(|stored| stored.id == ip.id) {
            stored.port_id = Some(port);
        }
        if let Some(server) = state.servers.get_mut(server_id) {
            if let Some(addresses) = server.addresses.values_mut().next() {
                addresses.push(ServerAddress {
                    addr: ip.floating_ip_address.clone(),
                    ip_type: Some("floating".to_string()),
                });
            }
        }
        Ok(())
    }

    async fn absolute_limits(&self) -> Result<AbsoluteLimits, CloudError> {
        Ok(self.limits.clone())
    }
}

/// Write a XAR (zip) archive containing empty pages at the given entry paths
pub fn write_xar(path: &Path, entries: &[&str]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for entry in entries {
        zip.start_file(*entry, options).unwrap();
        zip.write_all(b"<xwikidoc/>").unwrap();
    }
    zip.finish().unwrap();
}

/// Create `<root>/<name>/` with patient files and an optional `dataset.xar`
pub fn write_dataset(root: &Path, name: &str, patients: &[(&str, &str)], xar_pages: Option<&[&str]>) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for (file, body) in patients {
        std::fs::write(dir.join(file), body).unwrap();
    }
    if let Some(pages) = xar_pages {
        write_xar(&dir.join("dataset.xar"), pages);
    }
    dir
}
