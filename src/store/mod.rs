//! # Control-Plane Store
//!
//! Durable records for nodes, memberships, platform users, instances and
//! per-user instance grants. The provisioning workflow only talks to the
//! [`ControlPlaneStore`] trait; [`InMemoryStore`] is the bundled engine.

pub mod errors;
pub mod memory;
pub mod models;

use std::future::Future;
use std::pin::Pin;

pub use errors::{StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreSnapshot};
pub use models::{Instance, InstanceAuthorization, Node, NodeMembership, UserRecord};

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Control-plane store
///
/// Every call is a suspension point. Implementations must make
/// `delete_instance` remove the instance's authorization rows as well.
pub trait ControlPlaneStore: Send + Sync {
    /// Look up a node by id
    fn node<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Node>>;

    /// Membership row of `principal_id` on `node_id`
    ///
    /// Fails with [`StoreError::NodeNotFound`] if the node does not exist;
    /// a missing membership is `Ok(None)`.
    fn node_membership<'a>(
        &'a self,
        node_id: &'a str,
        principal_id: &'a str,
    ) -> StoreFuture<'a, Option<NodeMembership>>;

    /// Platform-wide permission rows of a principal (empty if unknown)
    fn platform_permissions<'a>(&'a self, principal_id: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// Insert an instance row
    fn create_instance(&self, instance: Instance) -> StoreFuture<'_, Instance>;

    /// Delete an instance row and its authorization rows
    fn delete_instance<'a>(&'a self, instance_id: &'a str) -> StoreFuture<'a, ()>;

    /// Insert authorization rows as one durable write
    ///
    /// Every row's instance and user must exist. Rows are checked in order
    /// and the first failure aborts the batch with nothing written.
    fn create_authorizations(&self, rows: Vec<InstanceAuthorization>) -> StoreFuture<'_, ()>;

    /// Instances the principal holds at least one authorization row on
    fn instances_for_principal<'a>(
        &'a self,
        principal_id: &'a str,
    ) -> StoreFuture<'a, Vec<Instance>>;
}
