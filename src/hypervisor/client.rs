//! Hypervisor client seams.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::store::Node;

use super::errors::HypervisorResult;
use super::types::{
    InstanceCreateRequest, Network, OperationEnvelope, OperationMetadata, StorageVolume,
};

/// Boxed future returned by hypervisor calls
pub type HypervisorFuture<'a, T> = Pin<Box<dyn Future<Output = HypervisorResult<T>> + Send + 'a>>;

/// Per-node, per-request handle to a hypervisor
///
/// Resource metadata is fetched fresh on every call; nothing is cached.
pub trait HypervisorClient: Send + Sync {
    /// All volumes in a storage pool
    fn storage_volumes<'a>(&'a self, pool: &'a str) -> HypervisorFuture<'a, Vec<StorageVolume>>;

    /// A managed network, `None` if the node has no network by that name
    fn network<'a>(&'a self, name: &'a str) -> HypervisorFuture<'a, Option<Network>>;

    /// Submit an instance creation; resolves once the node accepts it
    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceCreateRequest,
    ) -> HypervisorFuture<'a, OperationEnvelope>;

    /// Current state of a background operation
    fn operation<'a>(&'a self, id: &'a str) -> HypervisorFuture<'a, OperationMetadata>;
}

/// Opens client handles for nodes
pub trait HypervisorConnector: Send + Sync {
    fn connect(&self, node: &Node) -> HypervisorResult<Arc<dyn HypervisorClient>>;
}
