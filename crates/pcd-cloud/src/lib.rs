//! pcdeploy cloud
//!
//! Starts, lists and removes build VMs on OpenStack:
//! - [`CloudApi`] is the seam between VM management and the cloud
//! - [`OpenStackClient`] implements it over the Keystone, Nova, Neutron and
//!   Glance REST APIs
//! - [`VmManager`] implements the deploy / list / delete actions
//!
//! # Example
//!
//! ```rust,ignore
//! use pcd_cloud::{CloudSettings, Credentials, OpenStackClient, VmManager};
//!
//! # async fn example() -> Result<(), pcd_cloud::CloudError> {
//! let client = OpenStackClient::connect(&Credentials::from_env()?).await?;
//! let manager = VmManager::new(client, CloudSettings::default());
//! let report = manager.list().await?;
//! println!("{} build servers", report.servers.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod api;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod openstack;

pub use api::CloudApi;
pub use config::{CloudSettings, Credentials};
pub use error::CloudError;
pub use manager::{ServerReport, ServerSummary, VmManager};
pub use model::{AbsoluteLimits, Flavor, FloatingIp, NewServer, Server, ServerAddress};
pub use openstack::OpenStackClient;
