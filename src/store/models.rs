//! Durable control-plane records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A remote hypervisor host managed by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    /// Host name or IP of the hypervisor API
    pub address: String,

    /// Hypervisor API port
    pub lxd_port: u16,

    /// Encrypted client certificate (base64 ciphertext)
    pub certificate: String,

    /// Encrypted client key (base64 ciphertext)
    pub key: String,

    /// Base64 nonce used for both ciphertexts
    pub enc_iv: String,
}

/// A principal's membership on a node with its granted permission rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMembership {
    pub node_id: String,
    pub user_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A platform user with its platform-wide permission rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A provisioned instance as recorded by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Also the instance name on the hypervisor
    pub id: String,
    pub name: String,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// New instance record with a freshly generated id
    ///
    /// Ids start with a letter so they are valid hypervisor instance names.
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: format!("i{}", Uuid::new_v4().simple()),
            name: name.into(),
            node_id: node_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// One (instance, user, permission) grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAuthorization {
    pub id: Uuid,
    pub instance_id: String,
    pub user_id: String,
    pub permission: String,
}

impl InstanceAuthorization {
    pub fn new(
        instance_id: impl Into<String>,
        user_id: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            user_id: user_id.into(),
            permission: permission.into(),
        }
    }
}
