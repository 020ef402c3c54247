//! Permission names and sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Grants creating an instance on a node
pub const CREATE_INSTANCE: &str = "create-instance";

/// Coarse grant that bypasses per-volume annotation checks
pub const ATTACH_VOLUME: &str = "attach-volume";

/// Coarse grant that bypasses per-network annotation checks
pub const ATTACH_NETWORK: &str = "attach-network";

/// Per-resource grant looked up in a resource's permission annotation
pub const ATTACH: &str = "attach";

/// A set of permission names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Platform and node permission sets of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub platform: PermissionSet,
    pub node: PermissionSet,
}

impl EffectivePermissions {
    pub fn new(platform: PermissionSet, node: PermissionSet) -> Self {
        Self { platform, node }
    }

    /// Whether either scope grants the permission
    pub fn allows(&self, permission: &str) -> bool {
        self.node.contains(permission) || self.platform.contains(permission)
    }
}
