//! In-memory hypervisor for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::store::Node;

use super::client::{HypervisorClient, HypervisorConnector, HypervisorFuture};
use super::errors::{HypervisorError, HypervisorResult};
use super::types::{
    InstanceCreateRequest, Network, OperationEnvelope, OperationMetadata, StorageVolume,
    PERMISSIONS_CONFIG_KEY,
};

#[derive(Default)]
struct Inner {
    pools: Mutex<HashMap<String, Vec<StorageVolume>>>,
    networks: Mutex<HashMap<String, Network>>,
    latency: Mutex<HashMap<String, Duration>>,
    create_failure: Mutex<Option<HypervisorError>>,
    created: Mutex<Vec<InstanceCreateRequest>>,
    operations: Mutex<HashMap<String, OperationMetadata>>,
    connected: Mutex<Vec<String>>,
    metadata_fetches: AtomicUsize,
    create_calls: AtomicUsize,
}

/// Hypervisor double that also acts as its own connector
///
/// Clones share state, so a test can keep one handle for assertions while
/// the orchestrator holds another.
#[derive(Clone, Default)]
pub struct InMemoryHypervisor {
    inner: Arc<Inner>,
}

fn lock_err() -> HypervisorError {
    HypervisorError::Transport("Lock poisoned".to_string())
}

impl InMemoryHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a volume to a pool; `annotation` becomes its `user.permissions`
    pub fn with_volume(self, pool: &str, name: &str, annotation: Option<&str>) -> Self {
        let mut config = BTreeMap::new();
        if let Some(annotation) = annotation {
            config.insert(PERMISSIONS_CONFIG_KEY.to_string(), annotation.to_string());
        }
        if let Ok(mut pools) = self.inner.pools.lock() {
            pools.entry(pool.to_string()).or_default().push(StorageVolume {
                name: name.to_string(),
                volume_type: "custom".to_string(),
                config,
            });
        }
        self
    }

    /// Add a network; `annotation` becomes its `user.permissions`
    pub fn with_network(self, name: &str, annotation: Option<&str>) -> Self {
        let mut config = BTreeMap::new();
        if let Some(annotation) = annotation {
            config.insert(PERMISSIONS_CONFIG_KEY.to_string(), annotation.to_string());
        }
        if let Ok(mut networks) = self.inner.networks.lock() {
            networks.insert(
                name.to_string(),
                Network {
                    name: name.to_string(),
                    config,
                },
            );
        }
        self
    }

    /// Delay metadata reads for a pool or network name
    pub fn with_latency(self, resource: &str, delay: Duration) -> Self {
        if let Ok(mut latency) = self.inner.latency.lock() {
            latency.insert(resource.to_string(), delay);
        }
        self
    }

    /// Make every create call fail with `error`
    ///
    /// A `Decode` error models a node that accepted the create but sent an
    /// unreadable answer, so the request is still recorded as created.
    pub fn failing_create(self, error: HypervisorError) -> Self {
        if let Ok(mut failure) = self.inner.create_failure.lock() {
            *failure = Some(error);
        }
        self
    }

    /// Number of volume-list and network reads so far
    pub fn metadata_fetches(&self) -> usize {
        self.inner.metadata_fetches.load(Ordering::SeqCst)
    }

    /// Number of create calls so far, failed ones included
    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    /// Accepted create requests
    pub fn created(&self) -> Vec<InstanceCreateRequest> {
        self.inner
            .created
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Node ids passed to `connect`
    pub fn connected_nodes(&self) -> Vec<String> {
        self.inner
            .connected
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    async fn simulate_latency(&self, resource: &str) {
        let delay = self
            .inner
            .latency
            .lock()
            .ok()
            .and_then(|latency| latency.get(resource).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl HypervisorClient for InMemoryHypervisor {
    fn storage_volumes<'a>(&'a self, pool: &'a str) -> HypervisorFuture<'a, Vec<StorageVolume>> {
        Box::pin(async move {
            self.inner.metadata_fetches.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency(pool).await;

            let pools = self.inner.pools.lock().map_err(|_| lock_err())?;
            pools.get(pool).cloned().ok_or_else(|| {
                HypervisorError::api(
                    404,
                    json!({"type": "error", "error": "Storage pool not found", "error_code": 404}),
                )
            })
        })
    }

    fn network<'a>(&'a self, name: &'a str) -> HypervisorFuture<'a, Option<Network>> {
        Box::pin(async move {
            self.inner.metadata_fetches.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency(name).await;

            let networks = self.inner.networks.lock().map_err(|_| lock_err())?;
            Ok(networks.get(name).cloned())
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceCreateRequest,
    ) -> HypervisorFuture<'a, OperationEnvelope> {
        Box::pin(async move {
            self.inner.create_calls.fetch_add(1, Ordering::SeqCst);

            let failure = self.inner.create_failure.lock().map_err(|_| lock_err())?.clone();
            if failure.as_ref().map_or(true, HypervisorError::accepted_by_node) {
                self.inner
                    .created
                    .lock()
                    .map_err(|_| lock_err())?
                    .push(request.clone());
            }
            if let Some(error) = failure {
                return Err(error);
            }

            let id = Uuid::new_v4();
            let envelope = json!({
                "type": "async",
                "status": "Operation created",
                "status_code": 100,
                "operation": format!("/1.0/operations/{}", id),
                "error_code": 0,
                "error": "",
                "metadata": {
                    "id": id.to_string(),
                    "class": "task",
                    "description": "Creating instance",
                    "status": "Running",
                    "status_code": 103,
                    "resources": {
                        "containers": [format!("/1.0/containers/{}", request.name)],
                        "instances": [format!("/1.0/instances/{}", request.name)]
                    },
                    "may_cancel": false,
                    "err": ""
                }
            });
            let envelope: OperationEnvelope = serde_json::from_value(envelope)
                .map_err(|e| HypervisorError::Decode(e.to_string()))?;
            self.inner
                .operations
                .lock()
                .map_err(|_| lock_err())?
                .insert(id.to_string(), envelope.metadata.clone());
            Ok(envelope)
        })
    }

    fn operation<'a>(&'a self, id: &'a str) -> HypervisorFuture<'a, OperationMetadata> {
        Box::pin(async move {
            let operations = self.inner.operations.lock().map_err(|_| lock_err())?;
            operations.get(id).cloned().ok_or_else(|| {
                HypervisorError::api(
                    404,
                    json!({"type": "error", "error": "Operation not found", "error_code": 404}),
                )
            })
        })
    }
}

impl HypervisorConnector for InMemoryHypervisor {
    fn connect(&self, node: &Node) -> HypervisorResult<Arc<dyn HypervisorClient>> {
        self.inner
            .connected
            .lock()
            .map_err(|_| lock_err())?
            .push(node.id.clone());
        Ok(Arc::new(self.clone()))
    }
}
