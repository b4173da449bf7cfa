//! Cloud API abstraction

use crate::error::CloudError;
use crate::model::{AbsoluteLimits, Flavor, FloatingIp, NewServer, Server};
use async_trait::async_trait;

/// Operations VM management needs from the cloud.
///
/// Lookups return `Ok(None)` when the resource does not exist.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Server with exactly this name
    async fn find_server(&self, name: &str) -> Result<Option<Server>, CloudError>;

    /// Server by id
    async fn get_server(&self, id: &str) -> Result<Option<Server>, CloudError>;

    /// All servers of the project, with details
    async fn list_servers(&self) -> Result<Vec<Server>, CloudError>;

    /// Request a new server; returns it as currently known (usually `BUILD`)
    async fn create_server(&self, request: &NewServer) -> Result<Server, CloudError>;

    /// Request deletion; deleting a missing server is not an error
    async fn delete_server(&self, id: &str) -> Result<(), CloudError>;

    /// Image id by name
    async fn find_image(&self, name: &str) -> Result<Option<String>, CloudError>;

    /// Flavor by name
    async fn find_flavor(&self, name: &str) -> Result<Option<Flavor>, CloudError>;

    /// Network id by name
    async fn find_network(&self, name: &str) -> Result<Option<String>, CloudError>;

    /// Keypair name, if it exists
    async fn find_keypair(&self, name: &str) -> Result<Option<String>, CloudError>;

    /// Security group name, if it exists
    async fn find_security_group(&self, name: &str) -> Result<Option<String>, CloudError>;

    /// An allocated floating IP not bound to any port
    async fn find_available_floating_ip(&self) -> Result<Option<FloatingIp>, CloudError>;

    /// Allocate a floating IP from the given external network
    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, CloudError>;

    /// Bind a floating IP to the server's port
    async fn associate_floating_ip(&self, ip: &FloatingIp, server_id: &str) -> Result<(), CloudError>;

    /// Absolute compute limits and usage
    async fn absolute_limits(&self) -> Result<AbsoluteLimits, CloudError>;
}
