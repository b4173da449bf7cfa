//! Cloud resource types

use pcd_core::VmMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server still being built
pub const STATUS_BUILD: &str = "BUILD";
/// Server running
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Server failed
pub const STATUS_ERROR: &str = "ERROR";

/// Absolute compute limits and usage of the project
pub type AbsoluteLimits = serde_json::Map<String, serde_json::Value>;

/// A compute server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server id
    pub id: String,
    /// Server name, the build name for build VMs
    pub name: String,
    /// API status (`BUILD`, `ACTIVE`, `ERROR`, ...)
    #[serde(default)]
    pub status: String,
    /// Hypervisor-level state (`building`, `active`, ...)
    #[serde(rename = "OS-EXT-STS:vm_state", default)]
    pub vm_state: Option<String>,
    /// Creation timestamp as reported by the API
    #[serde(default)]
    pub created: Option<String>,
    /// Addresses per network name
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,
    /// Metadata key/value pairs, instruction chunks included
    #[serde(default)]
    pub metadata: VmMetadata,
}

impl Server {
    /// Whether the server has an address on `network`
    #[inline]
    #[must_use]
    pub fn is_on_network(&self, network: &str) -> bool {
        self.addresses.contains_key(network)
    }

    /// Floating address on `network`, if any
    #[must_use]
    pub fn floating_ip(&self, network: &str) -> Option<&str> {
        self.addresses
            .get(network)?
            .iter()
            .filter(|address| address.ip_type.as_deref() == Some("floating"))
            .map(|address| address.addr.as_str())
            .last()
    }
}

/// One address of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    /// IP address
    pub addr: String,
    /// `fixed` or `floating`
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub ip_type: Option<String>,
}

/// A server flavor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    /// Flavor id
    pub id: String,
    /// Flavor name
    pub name: String,
    /// Memory in MiB
    pub ram: u64,
    /// Virtual CPUs
    pub vcpus: u64,
    /// Root disk in GiB
    pub disk: u64,
}

/// A floating IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    /// Floating IP id
    pub id: String,
    /// Public address
    pub floating_ip_address: String,
    /// Port the address is associated with
    #[serde(default)]
    pub port_id: Option<String>,
}

/// Parameters of a server to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServer {
    /// Server name
    pub name: String,
    /// Boot image id
    pub image_id: String,
    /// Flavor id
    pub flavor_id: String,
    /// Id of the network the server is attached to
    pub network_id: String,
    /// Security group names
    pub security_groups: Vec<String>,
    /// Keypair name
    pub key_name: String,
    /// Metadata attached to the server
    pub metadata: VmMetadata,
}
