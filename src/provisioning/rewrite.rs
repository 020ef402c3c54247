//! Rewrites hypervisor operation paths into the control plane's own
//! addressing scheme.
//!
//! `/1.0/operations/<id>` becomes `/api/v1/nodes/<node>/operations/<id>`,
//! `/1.0/instances/<name>` becomes `/api/v1/instances/<name>`, and the
//! legacy `containers` resource list is dropped. Only the first occurrence
//! of the version prefix in each path is replaced.

use crate::hypervisor::{OperationEnvelope, OperationMetadata, API_PREFIX};

/// Top-level prefix of the control plane's public API
pub const PUBLIC_PREFIX: &str = "/api/v1";

/// Node-scoped prefix for resources that live on one node
pub fn node_prefix(node_id: &str) -> String {
    format!("{}/nodes/{}", PUBLIC_PREFIX, node_id)
}

/// Rewrite an accepted operation for the caller
pub fn rewrite_operation(mut operation: OperationEnvelope, node_id: &str) -> OperationEnvelope {
    operation.operation = operation
        .operation
        .replacen(API_PREFIX, &node_prefix(node_id), 1);
    rewrite_resources(&mut operation.metadata);
    operation
}

/// Rewrite the resource paths of an operation's metadata
pub fn rewrite_resources(metadata: &mut OperationMetadata) {
    if let Some(resources) = metadata.resources.as_mut() {
        resources.containers = None;
        for path in resources.instances.iter_mut() {
            *path = path.replacen(API_PREFIX, PUBLIC_PREFIX, 1);
        }
    }
}
