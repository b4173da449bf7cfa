//! VM metadata service client
//!
//! Inside an OpenStack VM the metadata document is served on a link-local
//! address. Outside a VM the request simply fails and the builder falls back
//! to command-line settings.

use crate::error::BuildError;
use pcd_core::metadata::merge_instruction_chunks;
use pcd_core::VmMetadata;
use serde_json::Value;
use std::time::Duration;

/// Reads VM metadata from the metadata service
#[derive(Debug, Clone)]
pub struct MetadataService {
    url: String,
    client: reqwest::Client,
}

impl MetadataService {
    /// Create a client for `url`
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Fetch the `meta` key/value pairs with instruction chunks reassembled.
    ///
    /// An unreachable service or an unparseable document yields empty metadata.
    ///
    /// # Errors
    /// Fails only if the document announces instruction chunks that cannot be
    /// reassembled.
    pub async fn fetch(&self) -> Result<VmMetadata, BuildError> {
        tracing::info!("Reading VM metadata...");

        let body = match self.fetch_body().await {
            Ok(body) => body,
            Err(e) => {
                tracing::info!("VM metadata not available: {}", e);
                return Ok(VmMetadata::new());
            }
        };

        Ok(parse_metadata_document(&body)?)
    }

    async fn fetch_body(&self) -> Result<String, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Extract the string members of `meta` from a metadata document and merge
/// instruction chunks.
///
/// # Errors
/// Fails if the instruction chunks are inconsistent.
pub fn parse_metadata_document(body: &str) -> Result<VmMetadata, pcd_core::MetadataError> {
    let meta = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut document)) => match document.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => return Ok(VmMetadata::new()),
        },
        Ok(_) => return Ok(VmMetadata::new()),
        Err(e) => {
            tracing::info!("Error parsing metadata JSON: {}", e);
            return Ok(VmMetadata::new());
        }
    };

    let metadata = meta
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            _ => None,
        })
        .collect();

    merge_instruction_chunks(metadata)
}
