//! Effective permission resolution at platform and node scope.

use std::sync::Arc;

use crate::auth::Principal;
use crate::store::{ControlPlaneStore, StoreResult};

use super::set::{EffectivePermissions, PermissionSet};

/// Computes a principal's permission sets from the control-plane store
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn ControlPlaneStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn ControlPlaneStore>) -> Self {
        Self { store }
    }

    /// Platform-wide permissions
    pub async fn resolve_platform(&self, principal: &Principal) -> StoreResult<PermissionSet> {
        let rows = self.store.platform_permissions(principal.id()).await?;
        Ok(rows.into_iter().collect())
    }

    /// Permissions from the principal's membership row on `node_id`
    ///
    /// No membership yields an empty set. A node id that does not exist
    /// fails with `StoreError::NodeNotFound`; callers check node existence
    /// first and do not rely on this for it.
    pub async fn resolve_node(
        &self,
        principal: &Principal,
        node_id: &str,
    ) -> StoreResult<PermissionSet> {
        let membership = self.store.node_membership(node_id, principal.id()).await?;
        Ok(membership
            .map(|m| m.permissions.into_iter().collect())
            .unwrap_or_default())
    }

    /// Both scopes at once
    pub async fn resolve(
        &self,
        principal: &Principal,
        node_id: &str,
    ) -> StoreResult<EffectivePermissions> {
        let (platform, node) = futures_util::try_join!(
            self.resolve_platform(principal),
            self.resolve_node(principal, node_id)
        )?;
        Ok(EffectivePermissions::new(platform, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Node, NodeMembership, StoreError, StoreSnapshot, UserRecord};

    fn resolver() -> PermissionResolver {
        let store = InMemoryStore::from_snapshot(StoreSnapshot {
            nodes: vec![Node {
                id: "n1".to_string(),
                address: "127.0.0.1".to_string(),
                lxd_port: 8443,
                certificate: String::new(),
                key: String::new(),
                enc_iv: String::new(),
            }],
            users: vec![UserRecord {
                id: "u1".to_string(),
                permissions: vec!["create-instance".to_string()],
            }],
            memberships: vec![NodeMembership {
                node_id: "n1".to_string(),
                user_id: "u1".to_string(),
                permissions: vec!["attach-volume".to_string()],
            }],
            ..Default::default()
        });
        PermissionResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_resolves_both_scopes() {
        let perms = resolver().resolve(&Principal::new("u1"), "n1").await.unwrap();
        assert!(perms.platform.contains("create-instance"));
        assert!(perms.node.contains("attach-volume"));
        assert!(!perms.node.contains("create-instance"));
    }

    #[tokio::test]
    async fn test_missing_membership_is_empty_not_error() {
        let node = resolver()
            .resolve_node(&Principal::new("u2"), "n1")
            .await
            .unwrap();
        assert!(node.is_empty());
    }

    #[tokio::test]
    async fn test_missing_node_is_error() {
        let result = resolver().resolve_node(&Principal::new("u1"), "n9").await;
        assert!(matches!(result, Err(StoreError::NodeNotFound(_))));
    }
}
