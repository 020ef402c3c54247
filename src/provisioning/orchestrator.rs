//! Provisioning workflow.
//!
//! `Resolving -> Authorizing -> Persisting -> RemoteProvisioning`, ending in
//! `Succeeded`, `Rejected`, `RolledBack`, `Inconsistent` or `Unconfirmed`.
//! Each step is a barrier: nothing is written until every device is
//! authorized, and the hypervisor is not called until the instance row and
//! all grants commit. Once the instance row exists the workflow always runs
//! to a terminal state.
//!
//! Only a create the node refused, or one that never reached it, is rolled
//! back. A success answer that cannot be decoded keeps the row.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::Principal;
use crate::hypervisor::{
    Devices, HypervisorConnector, InstanceCreateRequest, OperationEnvelope, OperationMetadata,
};
use crate::observability::{log_event, Event, Logger};
use crate::permissions::{EffectivePermissions, PermissionResolver, CREATE_INSTANCE};
use crate::store::{ControlPlaneStore, Instance, Node, StoreError};

use super::authorization::ResourceAuthorizationChecker;
use super::errors::{ProvisioningError, ProvisioningResult, ProvisioningState};
use super::records::{InstanceRecordManager, UserGrant};
use super::rewrite::{rewrite_operation, rewrite_resources};

/// Body of `POST /instances`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub node: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub users: Vec<UserGrant>,
}

/// Tracks and logs the state of one workflow run
struct Run<'a> {
    state: ProvisioningState,
    principal: &'a str,
    node: &'a str,
    instance_id: Option<String>,
}

impl<'a> Run<'a> {
    fn new(principal: &'a str, node: &'a str) -> Self {
        Self {
            state: ProvisioningState::Resolving,
            principal,
            node,
            instance_id: None,
        }
    }

    fn advance(&mut self, next: ProvisioningState) {
        let mut fields = vec![
            ("from", self.state.as_str()),
            ("node", self.node),
            ("principal", self.principal),
            ("to", next.as_str()),
        ];
        if let Some(id) = &self.instance_id {
            fields.push(("instance_id", id.as_str()));
        }
        if next.is_terminal() {
            Logger::info("PROVISION_STATE", &fields);
        } else {
            Logger::trace("PROVISION_STATE", &fields);
        }
        self.state = next;
    }

    /// Record a failure before anything was written
    fn reject(&mut self, error: ProvisioningError) -> ProvisioningError {
        let reason = error.to_string();
        log_event(
            Event::ProvisionRejected,
            &[
                ("node", self.node),
                ("principal", self.principal),
                ("reason", &reason),
                ("state", self.state.as_str()),
            ],
        );
        self.advance(ProvisioningState::Rejected);
        error
    }
}

/// Top-level create-instance workflow
#[derive(Clone)]
pub struct ProvisioningOrchestrator {
    store: Arc<dyn ControlPlaneStore>,
    connector: Arc<dyn HypervisorConnector>,
    resolver: PermissionResolver,
    checker: ResourceAuthorizationChecker,
    records: InstanceRecordManager,
}

impl ProvisioningOrchestrator {
    pub fn new(store: Arc<dyn ControlPlaneStore>, connector: Arc<dyn HypervisorConnector>) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            checker: ResourceAuthorizationChecker::new(),
            records: InstanceRecordManager::new(store.clone()),
            store,
            connector,
        }
    }

    /// Provision an instance on behalf of `principal`
    ///
    /// On success the hypervisor's operation is returned rewritten into the
    /// control plane's addressing scheme.
    pub async fn provision(
        &self,
        principal: &Principal,
        request: CreateInstanceRequest,
    ) -> ProvisioningResult<OperationEnvelope> {
        let mut run = Run::new(principal.id(), &request.node);
        log_event(
            Event::ProvisionRequested,
            &[
                ("name", &request.name),
                ("node", &request.node),
                ("principal", principal.id()),
            ],
        );

        // Resolving
        let (node, permissions) = match self.node_access(principal, &request.node).await {
            Ok(access) => access,
            Err(e) => return Err(run.reject(e)),
        };
        if !permissions.allows(CREATE_INSTANCE) {
            return Err(run.reject(ProvisioningError::PermissionDenied));
        }

        // Authorizing
        run.advance(ProvisioningState::Authorizing);
        let client = match self.connector.connect(&node) {
            Ok(client) => client,
            Err(e) => return Err(run.reject(ProvisioningError::Connect(e))),
        };
        if let Err(e) = self
            .checker
            .authorize(principal, client.as_ref(), &request.devices, &permissions)
            .await
        {
            return Err(run.reject(e.into()));
        }
        log_event(
            Event::ProvisionAuthorized,
            &[("node", &node.id), ("principal", principal.id())],
        );

        // Persisting
        run.advance(ProvisioningState::Persisting);
        let instance = match self.records.create_instance(&request.name, &node.id).await {
            Ok(instance) => instance,
            Err(e) => return Err(run.reject(ProvisioningError::Store(e))),
        };
        run.instance_id = Some(instance.id.clone());
        if let Err(e) = self.records.grant_users(&instance.id, &request.users).await {
            let cause = ProvisioningError::GrantFailed {
                instance_id: instance.id.clone(),
                source_error: e,
            };
            return Err(self.roll_back(&mut run, &instance, cause).await);
        }
        let grant_count = request.users.len().to_string();
        log_event(
            Event::InstancePersisted,
            &[
                ("instance_id", &instance.id),
                ("node", &node.id),
                ("users", &grant_count),
            ],
        );

        // RemoteProvisioning
        run.advance(ProvisioningState::RemoteProvisioning);
        let create = InstanceCreateRequest {
            name: instance.id.clone(),
            instance_type: request.instance_type,
            config: request.config,
            devices: request.devices,
            source: request.source,
        };
        match client.create_instance(&create).await {
            Ok(operation) => {
                let operation = rewrite_operation(operation, &node.id);
                log_event(
                    Event::ProvisionAccepted,
                    &[
                        ("instance_id", &instance.id),
                        ("node", &node.id),
                        ("operation", &operation.operation),
                    ],
                );
                run.advance(ProvisioningState::Succeeded);
                Ok(operation)
            }
            Err(e) if e.accepted_by_node() => {
                let reason = e.to_string();
                log_event(
                    Event::ProvisionUnconfirmed,
                    &[
                        ("instance_id", &instance.id),
                        ("node", &node.id),
                        ("reason", &reason),
                    ],
                );
                run.advance(ProvisioningState::Unconfirmed);
                Err(ProvisioningError::Unconfirmed {
                    instance_id: instance.id.clone(),
                    source_error: e,
                })
            }
            Err(e) => {
                let cause = ProvisioningError::RemoteProvisioning(e);
                Err(self.roll_back(&mut run, &instance, cause).await)
            }
        }
    }

    /// Remove the instance after a downstream failure
    ///
    /// Returns `cause` if the rollback committed, otherwise `Inconsistent`.
    async fn roll_back(
        &self,
        run: &mut Run<'_>,
        instance: &Instance,
        cause: ProvisioningError,
    ) -> ProvisioningError {
        let reason = cause.to_string();
        match self.records.rollback(&instance.id).await {
            Ok(()) => {
                log_event(
                    Event::ProvisionRolledBack,
                    &[
                        ("instance_id", &instance.id),
                        ("node", &instance.node_id),
                        ("reason", &reason),
                    ],
                );
                run.advance(ProvisioningState::RolledBack);
                cause
            }
            Err(rollback) => {
                let rollback_error = rollback.to_string();
                log_event(
                    Event::ProvisionInconsistent,
                    &[
                        ("instance_id", &instance.id),
                        ("node", &instance.node_id),
                        ("reason", &reason),
                        ("rollback_error", &rollback_error),
                    ],
                );
                run.advance(ProvisioningState::Inconsistent);
                ProvisioningError::Inconsistent {
                    instance_id: instance.id.clone(),
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }

    /// Instances the principal holds at least one grant on
    pub async fn list_instances(&self, principal: &Principal) -> ProvisioningResult<Vec<Instance>> {
        let instances = self
            .store
            .instances_for_principal(principal.id())
            .await
            .map_err(ProvisioningError::Store)?;

        let count = instances.len().to_string();
        log_event(
            Event::InstancesListed,
            &[("count", &count), ("principal", principal.id())],
        );
        Ok(instances)
    }

    /// One instance, if the principal holds a grant on it
    pub async fn get_instance(
        &self,
        principal: &Principal,
        instance_id: &str,
    ) -> ProvisioningResult<Instance> {
        self.store
            .instances_for_principal(principal.id())
            .await
            .map_err(ProvisioningError::Store)?
            .into_iter()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| ProvisioningError::InstanceNotFound(instance_id.to_string()))
    }

    /// Current state of an operation on a node
    ///
    /// Visible to whoever may create instances on that node. Resource paths
    /// are rewritten the same way as for an accepted create.
    pub async fn operation(
        &self,
        principal: &Principal,
        node_id: &str,
        operation_id: &str,
    ) -> ProvisioningResult<OperationMetadata> {
        let (node, permissions) = self.node_access(principal, node_id).await?;
        if !permissions.allows(CREATE_INSTANCE) {
            return Err(ProvisioningError::PermissionDenied);
        }
        let client = self.connector.connect(&node).map_err(ProvisioningError::Connect)?;
        let mut metadata = client
            .operation(operation_id)
            .await
            .map_err(ProvisioningError::Operation)?;
        rewrite_resources(&mut metadata);
        Ok(metadata)
    }

    async fn node_access(
        &self,
        principal: &Principal,
        node_id: &str,
    ) -> ProvisioningResult<(Node, EffectivePermissions)> {
        let node = self
            .store
            .node(node_id)
            .await
            .map_err(ProvisioningError::Store)?
            .ok_or_else(|| ProvisioningError::NodeNotFound(node_id.to_string()))?;
        let permissions = self
            .resolver
            .resolve(principal, &node.id)
            .await
            .map_err(|e| match e {
                StoreError::NodeNotFound(id) => ProvisioningError::NodeNotFound(id),
                e => ProvisioningError::Store(e),
            })?;
        Ok((node, permissions))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::hypervisor::{HypervisorError, InMemoryHypervisor};
    use crate::store::{InMemoryStore, Node, NodeMembership, StoreFuture, StoreSnapshot, UserRecord};

    fn snapshot() -> StoreSnapshot {
        StoreSnapshot {
            nodes: vec![Node {
                id: "n1".to_string(),
                address: "127.0.0.1".to_string(),
                lxd_port: 8443,
                certificate: String::new(),
                key: String::new(),
                enc_iv: String::new(),
            }],
            memberships: vec![NodeMembership {
                node_id: "n1".to_string(),
                user_id: "u1".to_string(),
                permissions: vec!["create-instance".to_string()],
            }],
            users: vec![
                UserRecord {
                    id: "u1".to_string(),
                    permissions: vec![],
                },
                UserRecord {
                    id: "u2".to_string(),
                    permissions: vec![],
                },
            ],
            ..Default::default()
        }
    }

    fn request(devices: serde_json::Value, users: serde_json::Value) -> CreateInstanceRequest {
        serde_json::from_value(json!({
            "name": "vm1",
            "node": "n1",
            "type": "container",
            "devices": devices,
            "source": {"type": "image", "alias": "alpine"},
            "users": users,
        }))
        .unwrap()
    }

    fn setup(hypervisor: &InMemoryHypervisor) -> (Arc<InMemoryStore>, ProvisioningOrchestrator) {
        let store = Arc::new(InMemoryStore::from_snapshot(snapshot()));
        let orchestrator = ProvisioningOrchestrator::new(store.clone(), Arc::new(hypervisor.clone()));
        (store, orchestrator)
    }

    #[tokio::test]
    async fn test_provision_success_persists_and_rewrites() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let operation = orchestrator
            .provision(
                &Principal::new("u1"),
                request(
                    json!({"root": {"type": "disk", "path": "/", "pool": "default"}}),
                    json!([{"id": "u1", "permissions": ["view", "view"]}]),
                ),
            )
            .await
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.instances.len(), 1);
        let instance = &snapshot.instances[0];
        assert_eq!(instance.name, "vm1");
        assert_eq!(store.authorizations_for(&instance.id).unwrap().len(), 1);

        // The hypervisor sees the generated id, not the display name.
        let created = hypervisor.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, instance.id);

        assert!(operation.operation.starts_with("/api/v1/nodes/n1/operations/"));
        let resources = operation.metadata.resources.unwrap();
        assert_eq!(
            resources.instances,
            vec![format!("/api/v1/instances/{}", instance.id)]
        );
        assert!(resources.containers.is_none());
    }

    #[tokio::test]
    async fn test_unknown_node_is_rejected_before_connect() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let mut req = request(json!({}), json!([]));
        req.node = "missing".to_string();
        let err = orchestrator.provision(&Principal::new("u1"), req).await.unwrap_err();

        assert!(matches!(err, ProvisioningError::NodeNotFound(_)));
        assert_eq!(err.status_code(), 400);
        assert!(hypervisor.connected_nodes().is_empty());
        assert_eq!(store.instance_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_create_permission_is_forbidden() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(&Principal::new("u2"), request(json!({}), json!([])))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::PermissionDenied));
        assert_eq!(err.status_code(), 403);
        assert!(hypervisor.connected_nodes().is_empty());
        assert_eq!(hypervisor.create_calls(), 0);
        assert_eq!(store.instance_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_platform_permission_allows_create() {
        let hypervisor = InMemoryHypervisor::new();
        let mut seed = snapshot();
        seed.users[1].permissions = vec!["create-instance".to_string()];
        let store = Arc::new(InMemoryStore::from_snapshot(seed));
        let orchestrator = ProvisioningOrchestrator::new(store.clone(), Arc::new(hypervisor.clone()));

        orchestrator
            .provision(&Principal::new("u2"), request(json!({}), json!([])))
            .await
            .unwrap();
        assert_eq!(store.instance_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_authorization_failure_writes_nothing() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(
                &Principal::new("u1"),
                request(
                    json!({"eth0": {"type": "nic", "network": "net1"}}),
                    json!([{"id": "u1", "permissions": ["view"]}]),
                ),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "bad request: network does not exist");
        assert_eq!(err.terminal_state(), ProvisioningState::Rejected);
        assert_eq!(store.instance_count().unwrap(), 0);
        assert!(store.snapshot().unwrap().authorizations.is_empty());
        assert_eq!(hypervisor.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_rolls_back() {
        let upstream = json!({"type": "error", "error": "Invalid config", "error_code": 400});
        let hypervisor =
            InMemoryHypervisor::new().failing_create(HypervisorError::api(400, upstream.clone()));
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(
                &Principal::new("u1"),
                request(json!({}), json!([{"id": "u1", "permissions": ["view"]}])),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::RemoteProvisioning(_)));
        assert_eq!(err.terminal_state(), ProvisioningState::RolledBack);
        assert_eq!(err.body(), upstream);
        assert_eq!(hypervisor.create_calls(), 1);

        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.authorizations.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_acceptance_keeps_record() {
        let hypervisor = InMemoryHypervisor::new().failing_create(HypervisorError::Decode(
            "missing field `operation`".to_string(),
        ));
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(
                &Principal::new("u1"),
                request(json!({}), json!([{"id": "u1", "permissions": ["view"]}])),
            )
            .await
            .unwrap_err();

        let instance_id = match &err {
            ProvisioningError::Unconfirmed { instance_id, .. } => instance_id.clone(),
            other => panic!("expected Unconfirmed, got {:?}", other),
        };
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.terminal_state(), ProvisioningState::Unconfirmed);
        assert_eq!(hypervisor.create_calls(), 1);
        assert_eq!(hypervisor.created()[0].name, instance_id);

        // The node may be running the instance, so its row and grants stay.
        assert_eq!(store.instance_count().unwrap(), 1);
        assert_eq!(store.authorizations_for(&instance_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_rolls_back() {
        let hypervisor = InMemoryHypervisor::new()
            .failing_create(HypervisorError::Transport("connection refused".to_string()));
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(&Principal::new("u1"), request(json!({}), json!([])))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::RemoteProvisioning(_)));
        assert_eq!(err.status_code(), 502);
        assert_eq!(store.instance_count().unwrap(), 0);
        assert!(hypervisor.created().is_empty());
    }

    #[tokio::test]
    async fn test_grant_failure_rolls_back_before_remote_call() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let err = orchestrator
            .provision(
                &Principal::new("u1"),
                request(
                    json!({}),
                    json!([
                        {"id": "u1", "permissions": ["view"]},
                        {"id": "ghost", "permissions": ["view"]}
                    ]),
                ),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::GrantFailed { .. }));
        assert_eq!(err.status_code(), 400);
        assert_eq!(hypervisor.create_calls(), 0);
        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.authorizations.is_empty());
    }

    /// Store whose deletes always fail
    struct StuckStore(InMemoryStore);

    impl ControlPlaneStore for StuckStore {
        fn node<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Node>> {
            self.0.node(id)
        }

        fn node_membership<'a>(
            &'a self,
            node_id: &'a str,
            principal_id: &'a str,
        ) -> StoreFuture<'a, Option<NodeMembership>> {
            self.0.node_membership(node_id, principal_id)
        }

        fn platform_permissions<'a>(&'a self, principal_id: &'a str) -> StoreFuture<'a, Vec<String>> {
            self.0.platform_permissions(principal_id)
        }

        fn create_instance(&self, instance: Instance) -> StoreFuture<'_, Instance> {
            self.0.create_instance(instance)
        }

        fn delete_instance<'a>(&'a self, _instance_id: &'a str) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(StoreError::Storage("disk full".to_string())) })
        }

        fn create_authorizations(
            &self,
            rows: Vec<crate::store::InstanceAuthorization>,
        ) -> StoreFuture<'_, ()> {
            self.0.create_authorizations(rows)
        }

        fn instances_for_principal<'a>(
            &'a self,
            principal_id: &'a str,
        ) -> StoreFuture<'a, Vec<Instance>> {
            self.0.instances_for_principal(principal_id)
        }
    }

    #[tokio::test]
    async fn test_failed_rollback_is_inconsistent() {
        let hypervisor = InMemoryHypervisor::new().failing_create(HypervisorError::api(
            400,
            json!({"type": "error", "error": "Invalid config", "error_code": 400}),
        ));
        let store = Arc::new(StuckStore(InMemoryStore::from_snapshot(snapshot())));
        let orchestrator = ProvisioningOrchestrator::new(store.clone(), Arc::new(hypervisor.clone()));

        let err = orchestrator
            .provision(&Principal::new("u1"), request(json!({}), json!([])))
            .await
            .unwrap_err();

        match &err {
            ProvisioningError::Inconsistent { cause, rollback, .. } => {
                assert!(matches!(**cause, ProvisioningError::RemoteProvisioning(_)));
                assert!(matches!(rollback, StoreError::Storage(_)));
            }
            other => panic!("expected Inconsistent, got {:?}", other),
        }
        assert!(err.is_fatal());
        assert_eq!(err.status_code(), 500);
        assert_eq!(store.0.instance_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_instances_only_authorized() {
        let hypervisor = InMemoryHypervisor::new();
        let (_store, orchestrator) = setup(&hypervisor);

        orchestrator
            .provision(
                &Principal::new("u1"),
                request(json!({}), json!([{"id": "u2", "permissions": ["view"]}])),
            )
            .await
            .unwrap();
        orchestrator
            .provision(&Principal::new("u1"), request(json!({}), json!([])))
            .await
            .unwrap();

        assert_eq!(orchestrator.list_instances(&Principal::new("u2")).await.unwrap().len(), 1);
        assert!(orchestrator.list_instances(&Principal::new("u1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_instance_requires_grant() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        orchestrator
            .provision(
                &Principal::new("u1"),
                request(json!({}), json!([{"id": "u2", "permissions": ["view"]}])),
            )
            .await
            .unwrap();
        let id = store.snapshot().unwrap().instances[0].id.clone();

        let instance = orchestrator.get_instance(&Principal::new("u2"), &id).await.unwrap();
        assert_eq!(instance.name, "vm1");

        let err = orchestrator
            .get_instance(&Principal::new("u1"), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::InstanceNotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_operation_lookup_follows_accepted_create() {
        let hypervisor = InMemoryHypervisor::new();
        let (store, orchestrator) = setup(&hypervisor);

        let accepted = orchestrator
            .provision(&Principal::new("u1"), request(json!({}), json!([])))
            .await
            .unwrap();
        let operation_id = accepted.operation.rsplit('/').next().unwrap().to_string();
        let instance_id = store.snapshot().unwrap().instances[0].id.clone();

        let metadata = orchestrator
            .operation(&Principal::new("u1"), "n1", &operation_id)
            .await
            .unwrap();
        let resources = metadata.resources.unwrap();
        assert_eq!(resources.instances, vec![format!("/api/v1/instances/{}", instance_id)]);
        assert!(resources.containers.is_none());

        let err = orchestrator
            .operation(&Principal::new("u2"), "n1", &operation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::PermissionDenied));

        let err = orchestrator
            .operation(&Principal::new("u1"), "n1", "unknown")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.body()["error"], "Operation not found");
    }
}
