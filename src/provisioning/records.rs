//! Durable instance records and their per-user grants.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::permissions::PermissionSet;
use crate::store::{ControlPlaneStore, Instance, InstanceAuthorization, StoreResult};

/// Permissions one user receives on a new instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrant {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Creates and removes an instance row together with its grants
#[derive(Clone)]
pub struct InstanceRecordManager {
    store: Arc<dyn ControlPlaneStore>,
}

impl InstanceRecordManager {
    pub fn new(store: Arc<dyn ControlPlaneStore>) -> Self {
        Self { store }
    }

    /// Insert a new instance row
    pub async fn create_instance(&self, name: &str, node_id: &str) -> StoreResult<Instance> {
        self.store.create_instance(Instance::new(name, node_id)).await
    }

    /// Insert one authorization row per (user, permission)
    ///
    /// All rows go to the store as a single batch, so either every grant
    /// commits or none does. A failure names the first bad user in request
    /// order. Duplicate permissions for one user collapse to one row.
    pub async fn grant_users(&self, instance_id: &str, users: &[UserGrant]) -> StoreResult<()> {
        let rows = users
            .iter()
            .flat_map(|user| {
                let permissions: PermissionSet =
                    user.permissions.iter().map(String::as_str).collect();
                permissions
                    .iter()
                    .map(|permission| InstanceAuthorization::new(instance_id, &user.id, permission))
                    .collect::<Vec<_>>()
            })
            .collect();
        self.store.create_authorizations(rows).await
    }

    /// Delete the instance row and, with it, its authorization rows
    pub async fn rollback(&self, instance_id: &str) -> StoreResult<()> {
        self.store.delete_instance(instance_id).await
    }
}
