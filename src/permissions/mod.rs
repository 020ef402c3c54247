//! # Permissions
//!
//! Permission sets at platform and node scope, and their resolution.

pub mod resolver;
pub mod set;

pub use resolver::PermissionResolver;
pub use set::{
    EffectivePermissions, PermissionSet, ATTACH, ATTACH_NETWORK, ATTACH_VOLUME, CREATE_INSTANCE,
};
