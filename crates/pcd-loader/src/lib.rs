//! pcdeploy loader
//!
//! Loads test datasets into a running PhenomeCentral instance. A dataset is
//! a folder holding an optional `dataset.xar` (wiki pages imported through the
//! XWiki importer) and `P*.json` patient records (created through the REST
//! API and granted every consent).

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod uploader;
pub mod xar;

pub use client::{InstanceAddress, InstanceClient};
pub use config::LoaderSettings;
pub use dataset::{list_datasets, write_dataset_list};
pub use error::LoadError;
pub use uploader::{DatasetUploader, UploadReport};
