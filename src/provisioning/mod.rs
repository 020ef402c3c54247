//! # Provisioning
//!
//! Authorization-gated instance creation: resolve the caller's permissions,
//! authorize every attached resource, persist the instance with its user
//! grants, then ask the node's hypervisor to create it, rolling the record
//! back if the hypervisor refuses.

pub mod annotation;
pub mod authorization;
pub mod errors;
pub mod orchestrator;
pub mod records;
pub mod rewrite;

pub use annotation::{AnnotationEntry, PermissionAnnotation};
pub use authorization::ResourceAuthorizationChecker;
pub use errors::{
    AuthorizationError, AuthorizationResult, ProvisioningError, ProvisioningResult,
    ProvisioningState, ResourceKind,
};
pub use orchestrator::{CreateInstanceRequest, ProvisioningOrchestrator};
pub use records::{InstanceRecordManager, UserGrant};
pub use rewrite::{node_prefix, rewrite_operation, rewrite_resources, PUBLIC_PREFIX};
