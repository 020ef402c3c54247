//! Permission annotations carried by remote resources.
//!
//! A volume or network stores, under its `user.permissions` config key, a
//! JSON array of `{"id": <principal id>, "permissions": [<grant>, ...]}`.
//! It is decoded once here into a typed value.

use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::permissions::PermissionSet;

/// One principal's grants on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Decoded permission annotation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionAnnotation(Vec<AnnotationEntry>);

impl PermissionAnnotation {
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Union of every entry naming the principal
    pub fn grants_for(&self, principal: &Principal) -> PermissionSet {
        self.0
            .iter()
            .filter(|entry| entry.id == principal.id())
            .flat_map(|entry| entry.permissions.iter().cloned())
            .collect()
    }
}
