//! In-memory store with an optional JSON snapshot on disk.
//!
//! Every mutation is applied to a copy of the state, written to the
//! snapshot file (tmp + fsync + rename) and only then published. A failed
//! write leaves both the file and the in-memory view untouched.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::errors::{StoreError, StoreResult};
use super::models::{Instance, InstanceAuthorization, Node, NodeMembership, UserRecord};
use super::{ControlPlaneStore, StoreFuture};

/// Full store contents, also the on-disk snapshot format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub memberships: Vec<NodeMembership>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub authorizations: Vec<InstanceAuthorization>,
}

/// RwLock-protected store, optionally backed by a snapshot file
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreSnapshot>,
    path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Volatile store seeded with the given snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            path: None,
        }
    }

    /// Open a snapshot-backed store, creating the file if it is missing
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| StoreError::Storage(format!("Failed to read snapshot: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| StoreError::Storage(format!("Invalid snapshot: {}", e)))?
        } else {
            let empty = StoreSnapshot::default();
            write_snapshot(&path, &empty)?;
            empty
        };

        Ok(Self {
            state: RwLock::new(snapshot),
            path: Some(path),
        })
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        Ok(self.read()?.clone())
    }

    /// Add or replace a node
    pub fn upsert_node(&self, node: Node) -> StoreResult<()> {
        self.mutate(|state| {
            state.nodes.retain(|n| n.id != node.id);
            state.nodes.push(node);
            Ok(())
        })
    }

    /// Add or replace a user's platform permissions
    pub fn upsert_user(&self, user: UserRecord) -> StoreResult<()> {
        self.mutate(|state| {
            state.users.retain(|u| u.id != user.id);
            state.users.push(user);
            Ok(())
        })
    }

    /// Add or replace a node membership
    pub fn upsert_membership(&self, membership: NodeMembership) -> StoreResult<()> {
        self.mutate(|state| {
            if !state.nodes.iter().any(|n| n.id == membership.node_id) {
                return Err(StoreError::NodeNotFound(membership.node_id.clone()));
            }
            state
                .memberships
                .retain(|m| !(m.node_id == membership.node_id && m.user_id == membership.user_id));
            state.memberships.push(membership);
            Ok(())
        })
    }

    /// Number of instance rows
    pub fn instance_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.instances.len())
    }

    /// Authorization rows of one instance
    pub fn authorizations_for(&self, instance_id: &str) -> StoreResult<Vec<InstanceAuthorization>> {
        Ok(self
            .read()?
            .authorizations
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, StoreSnapshot>> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("Lock poisoned".to_string()))
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StoreSnapshot) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Storage("Lock poisoned".to_string()))?;

        let mut next = state.clone();
        let out = apply(&mut next)?;
        if let Some(path) = &self.path {
            write_snapshot(path, &next)?;
        }
        *state = next;
        Ok(out)
    }
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| StoreError::Storage(format!("Failed to encode snapshot: {}", e)))?;

    let tmp = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| StoreError::Storage(format!("Failed to write snapshot: {}", e)))
}

impl ControlPlaneStore for InMemoryStore {
    fn node<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Node>> {
        let result = self
            .read()
            .map(|state| state.nodes.iter().find(|n| n.id == id).cloned());
        Box::pin(async move { result })
    }

    fn node_membership<'a>(
        &'a self,
        node_id: &'a str,
        principal_id: &'a str,
    ) -> StoreFuture<'a, Option<NodeMembership>> {
        let result = self.read().and_then(|state| {
            if !state.nodes.iter().any(|n| n.id == node_id) {
                return Err(StoreError::NodeNotFound(node_id.to_string()));
            }
            Ok(state
                .memberships
                .iter()
                .find(|m| m.node_id == node_id && m.user_id == principal_id)
                .cloned())
        });
        Box::pin(async move { result })
    }

    fn platform_permissions<'a>(&'a self, principal_id: &'a str) -> StoreFuture<'a, Vec<String>> {
        let result = self.read().map(|state| {
            state
                .users
                .iter()
                .find(|u| u.id == principal_id)
                .map(|u| u.permissions.clone())
                .unwrap_or_default()
        });
        Box::pin(async move { result })
    }

    fn create_instance(&self, instance: Instance) -> StoreFuture<'_, Instance> {
        let result = self.mutate(|state| {
            if state.instances.iter().any(|i| i.id == instance.id) {
                return Err(StoreError::DuplicateInstance(instance.id.clone()));
            }
            if !state.nodes.iter().any(|n| n.id == instance.node_id) {
                return Err(StoreError::NodeNotFound(instance.node_id.clone()));
            }
            state.instances.push(instance.clone());
            Ok(instance)
        });
        Box::pin(async move { result })
    }

    fn delete_instance<'a>(&'a self, instance_id: &'a str) -> StoreFuture<'a, ()> {
        let result = self.mutate(|state| {
            let before = state.instances.len();
            state.instances.retain(|i| i.id != instance_id);
            if state.instances.len() == before {
                return Err(StoreError::InstanceNotFound(instance_id.to_string()));
            }
            state.authorizations.retain(|a| a.instance_id != instance_id);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn create_authorizations(&self, rows: Vec<InstanceAuthorization>) -> StoreFuture<'_, ()> {
        if rows.is_empty() {
            return Box::pin(async { Ok(()) });
        }
        let result = self.mutate(|state| {
            for row in &rows {
                if !state.instances.iter().any(|i| i.id == row.instance_id) {
                    return Err(StoreError::InstanceNotFound(row.instance_id.clone()));
                }
                if !state.users.iter().any(|u| u.id == row.user_id) {
                    return Err(StoreError::UserNotFound(row.user_id.clone()));
                }
            }
            state.authorizations.extend(rows);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn instances_for_principal<'a>(
        &'a self,
        principal_id: &'a str,
    ) -> StoreFuture<'a, Vec<Instance>> {
        let result = self.read().map(|state| {
            state
                .instances
                .iter()
                .filter(|i| {
                    state
                        .authorizations
                        .iter()
                        .any(|a| a.instance_id == i.id && a.user_id == principal_id)
                })
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }
}
