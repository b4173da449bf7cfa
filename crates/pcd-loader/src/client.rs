//! HTTP session with a running instance

use crate::config::LoaderSettings;
use crate::error::LoadError;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::fmt;

/// Base URL of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddress {
    base_url: String,
}

impl InstanceAddress {
    /// Address from `host[:port]`; `default_port` is used when no port is given.
    #[must_use]
    pub fn new(host: &str, use_https: bool, default_port: u16) -> Self {
        let host = host.trim().trim_end_matches('/');
        let host = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{default_port}")
        };
        let scheme = if use_https { "https" } else { "http" };
        Self {
            base_url: format!("{scheme}://{host}"),
        }
    }

    /// `scheme://host:port`
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of `resource` (a path starting with `/`)
    #[inline]
    #[must_use]
    pub fn url(&self, resource: &str) -> String {
        format!("{}{}", self.base_url, resource)
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

/// Authenticated client of one instance.
///
/// Redirects are never followed: the XAR upload answers with a redirect that
/// counts as success.
#[derive(Debug, Clone)]
pub struct InstanceClient {
    http: reqwest::Client,
    address: InstanceAddress,
    username: String,
    password: String,
}

impl InstanceClient {
    /// Create a client using the credentials and timeout from `settings`.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn new(address: InstanceAddress, settings: &LoaderSettings) -> Result<Self, LoadError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            http,
            address,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Get instance address
    #[inline]
    #[must_use]
    pub fn address(&self) -> &InstanceAddress {
        &self.address
    }

    fn request(&self, method: Method, resource: &str) -> RequestBuilder {
        self.http
            .request(method, self.address.url(resource))
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "*/*")
    }

    /// `HEAD` the base URL to open the session
    ///
    /// # Errors
    /// Fails if the instance is unreachable.
    pub async fn check_reachable(&self) -> Result<StatusCode, LoadError> {
        tracing::info!("Using base server URL {}", self.address);
        let response = self.request(Method::HEAD, "").send().await?;
        Ok(response.status())
    }

    /// `GET` a resource, returning status and body
    ///
    /// # Errors
    /// Fails on transport errors.
    pub async fn get(&self, resource: &str) -> Result<(StatusCode, String), LoadError> {
        let response = self.request(Method::GET, resource).send().await?;
        let status = response.status();
        Ok((status, response.text().await?))
    }

    /// `POST` a JSON document
    ///
    /// # Errors
    /// Fails on transport errors.
    pub async fn post_json(&self, resource: &str, body: &Value) -> Result<Response, LoadError> {
        Ok(self.request(Method::POST, resource).json(body).send().await?)
    }

    /// `PUT` a JSON document
    ///
    /// # Errors
    /// Fails on transport errors.
    pub async fn put_json(&self, resource: &str, body: &Value) -> Result<StatusCode, LoadError> {
        let response = self.request(Method::PUT, resource).json(body).send().await?;
        Ok(response.status())
    }

    /// `POST` a multipart form
    ///
    /// # Errors
    /// Fails on transport errors.
    pub async fn post_multipart(&self, resource: &str, form: Form) -> Result<StatusCode, LoadError> {
        let response = self.request(Method::POST, resource).multipart(form).send().await?;
        Ok(response.status())
    }

    /// `POST` with an empty form-encoded body; parameters travel in `resource`'s query
    ///
    /// # Errors
    /// Fails on transport errors.
    pub async fn post_form(&self, resource: &str) -> Result<StatusCode, LoadError> {
        let response = self
            .request(Method::POST, resource)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .send()
            .await?;
        Ok(response.status())
    }
}
