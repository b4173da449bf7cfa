//! OpenStack REST client
//!
//! Authenticates against Keystone v3 with a project-scoped password token and
//! talks to the public Nova, Neutron and Glance endpoints from the returned
//! service catalog.

use crate::api::CloudApi;
use crate::config::Credentials;
use crate::error::CloudError;
use crate::model::{AbsoluteLimits, Flavor, FloatingIp, NewServer, Server, STATUS_BUILD};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_HEADER: &str = "X-Auth-Token";
const MAX_ERROR_BODY: usize = 512;

/// OpenStack client bound to one authenticated session
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    http: reqwest::Client,
    token: String,
    compute_url: String,
    network_url: String,
    image_url: String,
}

impl OpenStackClient {
    /// Authenticate with a 60 second request timeout.
    ///
    /// # Errors
    ///
    /// Fails when Keystone rejects the credentials or the catalog lacks a
    /// compute, network or image endpoint.
    pub async fn connect(credentials: &Credentials) -> Result<Self, CloudError> {
        Self::connect_with_timeout(credentials, Duration::from_secs(60)).await
    }

    /// Authenticate and resolve service endpoints.
    ///
    /// # Errors
    ///
    /// See [`OpenStackClient::connect`].
    pub async fn connect_with_timeout(
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!("{}/auth/tokens", identity_base(&credentials.auth_url));

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": credentials.username,
                            "domain": {"name": credentials.user_domain_name},
                            "password": credentials.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": credentials.project_name,
                        "domain": {"name": credentials.project_domain_name},
                    }
                }
            }
        });

        tracing::debug!("Requesting token from {}", url);
        let response = http.post(&url).json(&body).send().await?;
        let response = ensure_success(Method::POST, &url, response).await?;

        let token = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Auth(format!("response carries no {TOKEN_HEADER} header")))?;

        let document: TokenDocument = response.json().await?;
        let catalog = &document.token.catalog;
        let region = credentials.region_name.as_deref();

        let client = Self {
            http,
            token,
            compute_url: endpoint(catalog, "compute", region)?,
            network_url: versioned(&endpoint(catalog, "network", region)?, "v2.0"),
            image_url: versioned(&endpoint(catalog, "image", region)?, "v2"),
        };

        tracing::info!("Authenticated as {} against {}", credentials.username, credentials.auth_url);
        Ok(client)
    }

    /// Client for an already issued token and known endpoints.
    ///
    /// `network_url` and `image_url` get their API version appended when it is
    /// missing.
    #[must_use]
    pub fn with_token(
        http: reqwest::Client,
        token: impl Into<String>,
        compute_url: &str,
        network_url: &str,
        image_url: &str,
    ) -> Self {
        Self {
            http,
            token: token.into(),
            compute_url: compute_url.trim_end_matches('/').to_string(),
            network_url: versioned(network_url, "v2.0"),
            image_url: versioned(image_url, "v2"),
        }
    }

    /// Send a request; `Ok(None)` on 404.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<reqwest::Response>, CloudError> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTH_HEADER, &self.token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success(method, url, response).await.map(Some)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, CloudError> {
        match self.execute(Method::GET, url, query, None).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    /// Like [`fetch`](Self::fetch), with 404 being an error
    async fn fetch_required<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CloudError> {
        self.fetch(url, query)
            .await?
            .ok_or_else(|| not_found_error(&Method::GET, url))
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &Value,
    ) -> Result<T, CloudError> {
        let response = self
            .execute(method.clone(), url, &[], Some(body))
            .await?
            .ok_or_else(|| not_found_error(&method, url))?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CloudApi for OpenStackClient {
    async fn find_server(&self, name: &str) -> Result<Option<Server>, CloudError> {
        let url = format!("{}/servers/detail", self.compute_url);
        let list: ServerList = self.fetch_required(&url, &[("name", name)]).await?;
        // the name filter is a pattern match on the server side
        Ok(list.servers.into_iter().find(|server| server.name == name))
    }

    async fn get_server(&self, id: &str) -> Result<Option<Server>, CloudError> {
        let url = format!("{}/servers/{}", self.compute_url, id);
        let envelope: Option<ServerEnvelope> = self.fetch(&url, &[]).await?;
        Ok(envelope.map(|e| e.server))
    }

    async fn list_servers(&self) -> Result<Vec<Server>, CloudError> {
        let url = format!("{}/servers/detail", self.compute_url);
        let list: ServerList = self.fetch_required(&url, &[]).await?;
        Ok(list.servers)
    }

    async fn create_server(&self, request: &NewServer) -> Result<Server, CloudError> {
        let url = format!("{}/servers", self.compute_url);
        let security_groups: Vec<Value> = request
            .security_groups
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        let body = json!({
            "server": {
                "name": request.name,
                "imageRef": request.image_id,
                "flavorRef": request.flavor_id,
                "networks": [{"uuid": request.network_id}],
                "security_groups": security_groups,
                "key_name": request.key_name,
                "metadata": request.metadata,
            }
        });

        let created: CreatedEnvelope = self.send_required(Method::POST, &url, &body).await?;
        let id = created.server.id;
        tracing::debug!("Server {} requested with id {}", request.name, id);

        Ok(self.get_server(&id).await?.unwrap_or_else(|| Server {
            id,
            name: request.name.clone(),
            status: STATUS_BUILD.to_string(),
            vm_state: None,
            created: None,
            addresses: std::collections::BTreeMap::new(),
            metadata: request.metadata.clone(),
        }))
    }

    async fn delete_server(&self, id: &str) -> Result<(), CloudError> {
        let url = format!("{}/servers/{}", self.compute_url, id);
        if self.execute(Method::DELETE, &url, &[], None).await?.is_none() {
            tracing::debug!("Server {} already gone", id);
        }
        Ok(())
    }

    async fn find_image(&self, name: &str) -> Result<Option<String>, CloudError> {
        let url = format!("{}/images", self.image_url);
        let list: ImageList = self.fetch_required(&url, &[("name", name)]).await?;
        Ok(list.images.into_iter().next().map(|image| image.id))
    }

    async fn find_flavor(&self, name: &str) -> Result<Option<Flavor>, CloudError> {
        let url = format!("{}/flavors/detail", self.compute_url);
        let list: FlavorList = self.fetch_required(&url, &[]).await?;
        Ok(list
            .flavors
            .into_iter()
            .find(|flavor| flavor.name == name || flavor.id == name))
    }

    async fn find_network(&self, name: &str) -> Result<Option<String>, CloudError> {
        let url = format!("{}/networks", self.network_url);
        let list: NetworkList = self.fetch_required(&url, &[("name", name)]).await?;
        Ok(list.networks.into_iter().next().map(|network| network.id))
    }

    async fn find_keypair(&self, name: &str) -> Result<Option<String>, CloudError> {
        let url = format!("{}/os-keypairs/{}", self.compute_url, name);
        let envelope: Option<KeypairEnvelope> = self.fetch(&url, &[]).await?;
        Ok(envelope.map(|e| e.keypair.name))
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<String>, CloudError> {
        let url = format!("{}/security-groups", self.network_url);
        let list: SecurityGroupList = self.fetch_required(&url, &[("name", name)]).await?;
        Ok(list
            .security_groups
            .into_iter()
            .find(|group| group.name == name)
            .map(|group| group.name))
    }

    async fn find_available_floating_ip(&self) -> Result<Option<FloatingIp>, CloudError> {
        let url = format!("{}/floatingips", self.network_url);
        let list: FloatingIpList = self.fetch_required(&url, &[("status", "DOWN")]).await?;
        Ok(list.floatingips.into_iter().find(|ip| ip.port_id.is_none()))
    }

    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, CloudError> {
        let url = format!("{}/floatingips", self.network_url);
        let body = json!({ "floatingip": { "floating_network_id": network_id } });
        let envelope: FloatingIpEnvelope = self.send_required(Method::POST, &url, &body).await?;
        Ok(envelope.floatingip)
    }

    async fn associate_floating_ip(&self, ip: &FloatingIp, server_id: &str) -> Result<(), CloudError> {
        let ports_url = format!("{}/ports", self.network_url);
        let ports: PortList = self
            .fetch_required(&ports_url, &[("device_id", server_id)])
            .await?;
        let port = ports
            .ports
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::FloatingIp(format!("server {server_id} has no network port")))?;

        let url = format!("{}/floatingips/{}", self.network_url, ip.id);
        let body = json!({ "floatingip": { "port_id": port.id } });
        let _: FloatingIpEnvelope = self.send_required(Method::PUT, &url, &body).await?;
        Ok(())
    }

    async fn absolute_limits(&self) -> Result<AbsoluteLimits, CloudError> {
        let url = format!("{}/limits", self.compute_url);
        let document: LimitsDocument = self.fetch_required(&url, &[]).await?;
        Ok(document.limits.absolute)
    }
}

/// Keystone v3 base URL
fn identity_base(auth_url: &str) -> String {
    versioned(auth_url, "v3")
}

/// `base` with `/version` appended unless already present
fn versioned(base: &str, version: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(&format!("/{version}")) {
        base.to_string()
    } else {
        format!("{base}/{version}")
    }
}

fn endpoint(
    catalog: &[CatalogEntry],
    service_type: &'static str,
    region: Option<&str>,
) -> Result<String, CloudError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == "public"
                && region.map_or(true, |wanted| ep.region.as_deref() == Some(wanted))
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
        .ok_or(CloudError::MissingEndpoint(service_type))
}

async fn ensure_success(
    method: Method,
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    Err(CloudError::Api {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn not_found_error(method: &Method, url: &str) -> CloudError {
    CloudError::Api {
        method: method.to_string(),
        url: url.to_string(),
        status: StatusCode::NOT_FOUND.as_u16(),
        body: String::new(),
    }
}

#[derive(Deserialize)]
struct TokenDocument {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct CreatedEnvelope {
    server: IdOnly,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<IdOnly>,
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct NetworkList {
    networks: Vec<IdOnly>,
}

#[derive(Deserialize)]
struct KeypairEnvelope {
    keypair: NameOnly,
}

#[derive(Deserialize)]
struct NameOnly {
    name: String,
}

#[derive(Deserialize)]
struct SecurityGroupList {
    security_groups: Vec<NameOnly>,
}

#[derive(Deserialize)]
struct FloatingIpList {
    floatingips: Vec<FloatingIp>,
}

#[derive(Deserialize)]
struct FloatingIpEnvelope {
    floatingip: FloatingIp,
}

#[derive(Deserialize)]
struct PortList {
    ports: Vec<IdOnly>,
}

#[derive(Deserialize)]
struct LimitsDocument {
    limits: LimitsBody,
}

#[derive(Deserialize)]
struct LimitsBody {
    absolute: AbsoluteLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_missing_versions() {
        assert_eq!(versioned("https://keystone:5000", "v3"), "https://keystone:5000/v3");
        assert_eq!(versioned("https://keystone:5000/v3/", "v3"), "https://keystone:5000/v3");
        assert_eq!(versioned("https://neutron:9696/v2.0", "v2.0"), "https://neutron:9696/v2.0");
    }

    #[test]
    fn picks_public_endpoint_in_region() {
        let catalog: Vec<CatalogEntry> = serde_json::from_value(json!([
            {"type": "compute", "endpoints": [
                {"interface": "internal", "region": "RegionOne", "url": "http://internal:8774/v2.1"},
                {"interface": "public", "region": "RegionTwo", "url": "http://two:8774/v2.1"},
                {"interface": "public", "region": "RegionOne", "url": "http://one:8774/v2.1/"}
            ]},
            {"type": "identity", "endpoints": []}
        ]))
        .unwrap();

        assert_eq!(
            endpoint(&catalog, "compute", Some("RegionOne")).unwrap(),
            "http://one:8774/v2.1"
        );
        assert_eq!(endpoint(&catalog, "compute", None).unwrap(), "http://two:8774/v2.1");
        assert!(matches!(
            endpoint(&catalog, "network", None),
            Err(CloudError::MissingEndpoint("network"))
        ));
    }
}
