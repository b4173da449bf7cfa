//! Error types for VM provisioning

/// VM provisioning error
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// An `OS_*` environment variable is not set
    #[error("missing OpenStack credential: environment variable {0} is not set")]
    MissingCredential(&'static str),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error status
    #[error("{method} {url} failed with HTTP {status}: {body}")]
    Api {
        /// HTTP method
        method: String,
        /// Request URL
        url: String,
        /// Response status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Authentication response was unusable
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The service catalog has no usable endpoint for a service
    #[error("no public {0} endpoint in the service catalog")]
    MissingEndpoint(&'static str),

    /// A deploy or delete was requested without a build name
    #[error("no build name is provided")]
    NoBuildName,

    /// A named cloud resource does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (image, flavor, ...)
        kind: &'static str,
        /// Name that was looked up
        name: String,
    },

    /// The VM did not reach ACTIVE
    #[error("failed to start VM {name} (last status: {}): {reason}", status.as_deref().unwrap_or("unknown"))]
    ServerStartFailed {
        /// Build name
        name: String,
        /// Last observed status, if the server still exists
        status: Option<String>,
        /// What went wrong
        reason: String,
    },

    /// A deleted VM did not disappear in time
    #[error("server {0} was not deleted in time")]
    DeleteTimeout(String),

    /// Floating IP could not be allocated or associated
    #[error("floating IP assignment failed: {0}")]
    FloatingIp(String),

    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Process exit code for this error
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NoBuildName => 2,
            Self::ServerStartFailed { .. } => 3,
            Self::FloatingIp(_) => 4,
            _ => 1,
        }
    }
}
