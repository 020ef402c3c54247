//! nodegate - authorization-gated instance provisioning
//!
//! A control plane in front of remote hypervisor nodes. Callers create
//! instances on a node; every attached volume and network is checked
//! against the caller's permissions before anything is persisted, and the
//! instance record is rolled back if the node refuses to create it.

pub mod auth;
pub mod cli;
pub mod http_server;
pub mod hypervisor;
pub mod observability;
pub mod permissions;
pub mod provisioning;
pub mod store;
