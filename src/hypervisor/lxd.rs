//! HTTPS client for LXD-style hypervisor APIs.
//!
//! Authenticates with the node's client certificate and talks to
//! `https://{address}:{lxd_port}/1.0/...`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Node;

use super::client::{HypervisorClient, HypervisorConnector, HypervisorFuture};
use super::credentials::{NodeCipher, NodeCredentials};
use super::errors::{HypervisorError, HypervisorResult};
use super::types::{
    InstanceCreateRequest, Network, OperationEnvelope, OperationMetadata, StorageVolume,
    SyncResponse,
};

/// Hypervisor API version prefix
pub const API_PREFIX: &str = "/1.0";

/// Client settings shared by every node connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// Nodes usually serve self-signed certificates (default: true)
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: default_accept_invalid_certs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client bound to a single node
pub struct LxdClient {
    base_url: Url,
    http: reqwest::Client,
}

impl LxdClient {
    pub fn new(
        node: &Node,
        credentials: &NodeCredentials,
        config: &HypervisorConfig,
    ) -> HypervisorResult<Self> {
        let identity = reqwest::Identity::from_pem(&credentials.identity_pem())
            .map_err(|e| HypervisorError::Credentials(format!("invalid client identity: {}", e)))?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HypervisorError::Transport(format!("failed to build client: {}", e)))?;

        let base_url = Url::parse(&format!(
            "https://{}:{}{}",
            node.address, node.lxd_port, API_PREFIX
        ))
        .map_err(|e| HypervisorError::Transport(format!("invalid node address: {}", e)))?;

        Ok(Self { base_url, http })
    }

    async fn get_metadata<T: DeserializeOwned>(&self, url: Url) -> HypervisorResult<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| HypervisorError::Transport(e.to_string()))?;

        let response = check_status(response).await?;
        let body: SyncResponse<T> = response
            .json()
            .await
            .map_err(|e| HypervisorError::Decode(e.to_string()))?;
        Ok(body.metadata)
    }
}

/// API URL under `base` with each segment percent-encoded
fn endpoint(base: &Url, segments: &[&str]) -> HypervisorResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| HypervisorError::Transport(format!("{} cannot carry a path", base)))?
        .extend(segments);
    Ok(url)
}

/// Turn a non-success response into `HypervisorError::Api`, body intact
async fn check_status(response: reqwest::Response) -> HypervisorResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .map_err(|e| HypervisorError::Transport(e.to_string()))?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Err(HypervisorError::api(status.as_u16(), body))
}

impl HypervisorClient for LxdClient {
    fn storage_volumes<'a>(&'a self, pool: &'a str) -> HypervisorFuture<'a, Vec<StorageVolume>> {
        Box::pin(async move {
            let mut url = endpoint(&self.base_url, &["storage-pools", pool, "volumes"])?;
            url.query_pairs_mut().append_pair("recursion", "1");
            self.get_metadata::<Vec<StorageVolume>>(url).await
        })
    }

    fn network<'a>(&'a self, name: &'a str) -> HypervisorFuture<'a, Option<Network>> {
        Box::pin(async move {
            let url = endpoint(&self.base_url, &["networks", name])?;
            match self.get_metadata::<Network>(url).await {
                Ok(network) => Ok(Some(network)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceCreateRequest,
    ) -> HypervisorFuture<'a, OperationEnvelope> {
        Box::pin(async move {
            let url = endpoint(&self.base_url, &["instances"])?;
            let response = self
                .http
                .post(url)
                .json(request)
                .send()
                .await
                .map_err(|e| HypervisorError::Transport(e.to_string()))?;

            check_status(response)
                .await?
                .json::<OperationEnvelope>()
                .await
                .map_err(|e| HypervisorError::Decode(e.to_string()))
        })
    }

    fn operation<'a>(&'a self, id: &'a str) -> HypervisorFuture<'a, OperationMetadata> {
        Box::pin(async move {
            let url = endpoint(&self.base_url, &["operations", id])?;
            self.get_metadata::<OperationMetadata>(url).await
        })
    }
}

/// Connector that decrypts node credentials and opens an [`LxdClient`]
#[derive(Clone)]
pub struct LxdConnector {
    cipher: NodeCipher,
    config: HypervisorConfig,
}

impl LxdConnector {
    pub fn new(cipher: NodeCipher, config: HypervisorConfig) -> Self {
        Self { cipher, config }
    }
}

impl HypervisorConnector for LxdConnector {
    fn connect(&self, node: &Node) -> HypervisorResult<Arc<dyn HypervisorClient>> {
        let credentials = self.cipher.open(node)?;
        Ok(Arc::new(LxdClient::new(node, &credentials, &self.config)?))
    }
}
