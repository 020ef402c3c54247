//! # Hypervisor
//!
//! Wire shapes, client seams and implementations for the remote
//! hypervisor nodes instances are provisioned on.

pub mod client;
pub mod credentials;
pub mod errors;
pub mod lxd;
pub mod memory;
pub mod types;

pub use client::{HypervisorClient, HypervisorConnector, HypervisorFuture};
pub use credentials::{NodeCipher, NodeCredentials, SealedCredentials};
pub use errors::{HypervisorError, HypervisorResult};
pub use lxd::{HypervisorConfig, LxdClient, LxdConnector, API_PREFIX};
pub use memory::InMemoryHypervisor;
pub use types::{
    Device, DeviceKind, Devices, InstanceCreateRequest, Network, OperationEnvelope,
    OperationMetadata, OperationResources, StorageVolume, PERMISSIONS_CONFIG_KEY, ROOT_DEVICE,
};
