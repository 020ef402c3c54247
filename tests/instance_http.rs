//! Instance HTTP Scenario Tests
//!
//! Exercises the `/api/v1` instance routes through the full axum router
//! with the in-memory store and hypervisor, following the references an
//! accepted create hands back.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use nodegate::auth::{JwtConfig, JwtManager, Principal};
use nodegate::http_server::{HttpServer, HttpServerConfig, InstanceState};
use nodegate::hypervisor::{HypervisorError, InMemoryHypervisor};
use nodegate::provisioning::ProvisioningOrchestrator;
use nodegate::store::{
    ControlPlaneStore, InMemoryStore, Instance, InstanceAuthorization, Node, NodeMembership,
    StoreSnapshot, UserRecord,
};

struct Harness {
    store: Arc<InMemoryStore>,
    hypervisor: InMemoryHypervisor,
    jwt: JwtManager,
    router: Router,
}

impl Harness {
    fn new(node_permissions: &[&str], hypervisor: InMemoryHypervisor) -> Self {
        let store = Arc::new(InMemoryStore::from_snapshot(StoreSnapshot {
            nodes: vec![Node {
                id: "n1".to_string(),
                address: "10.0.0.1".to_string(),
                lxd_port: 8443,
                certificate: String::new(),
                key: String::new(),
                enc_iv: String::new(),
            }],
            memberships: vec![NodeMembership {
                node_id: "n1".to_string(),
                user_id: "u1".to_string(),
                permissions: node_permissions.iter().map(|p| p.to_string()).collect(),
            }],
            users: vec![UserRecord {
                id: "u1".to_string(),
                permissions: vec!["create-instance".to_string()],
            }],
            ..Default::default()
        }));

        let jwt = JwtManager::new(JwtConfig {
            secret: "integration_secret_key".to_string(),
            ..Default::default()
        });
        let orchestrator = ProvisioningOrchestrator::new(store.clone(), Arc::new(hypervisor.clone()));
        let state = Arc::new(InstanceState::new(orchestrator, jwt.clone()));
        let router = HttpServer::new(HttpServerConfig::default(), state).router();

        Self {
            store,
            hypervisor,
            jwt,
            router,
        }
    }

    fn bearer(&self, user: &str) -> String {
        let token = self.jwt.generate_access_token(&Principal::new(user)).unwrap();
        format!("Bearer {}", token)
    }

    async fn post(&self, user: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post("/api/v1/instances")
            .header("authorization", self.bearer(user))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn list(&self, user: &str) -> (StatusCode, Value) {
        self.get(user, "/api/v1/instances").await
    }

    async fn get(&self, user: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri)
            .header("authorization", self.bearer(user))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

fn vm1_request() -> Value {
    json!({
        "name": "vm1",
        "node": "n1",
        "type": "container",
        "config": {},
        "devices": {
            "root": {"type": "disk", "path": "/", "pool": "default"},
            "eth0": {"type": "nic", "network": "net1"}
        },
        "source": {"type": "image", "alias": "alpine"},
        "users": [{"id": "u1", "permissions": ["view"]}]
    })
}

/// Test: Unannotated network without attach-network is rejected with no rows.
#[tokio::test]
async fn test_unannotated_network_rejected() {
    let harness = Harness::new(&[], InMemoryHypervisor::new().with_network("net1", None));

    let (status, body) = harness.post("u1", vm1_request()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "code": 400,
            "error": "bad request: network does not have user.permissions",
            "type": "error"
        })
    );
    let snapshot = harness.store.snapshot().unwrap();
    assert!(snapshot.instances.is_empty());
    assert!(snapshot.authorizations.is_empty());
    assert_eq!(harness.hypervisor.create_calls(), 0);
}

/// Test: Node-scoped attach-network lets the same request through.
#[tokio::test]
async fn test_attach_network_accepts() {
    let harness = Harness::new(
        &["attach-network"],
        InMemoryHypervisor::new().with_network("net1", None),
    );

    let (status, body) = harness.post("u1", vm1_request()).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let snapshot = harness.store.snapshot().unwrap();
    assert_eq!(snapshot.instances.len(), 1);
    let instance = &snapshot.instances[0];
    assert_eq!(instance.name, "vm1");
    assert_eq!(instance.node_id, "n1");

    assert_eq!(snapshot.authorizations.len(), 1);
    assert_eq!(snapshot.authorizations[0].user_id, "u1");
    assert_eq!(snapshot.authorizations[0].permission, "view");

    assert!(body["operation"]
        .as_str()
        .unwrap()
        .starts_with("/api/v1/nodes/n1/operations/"));
    assert_eq!(
        body["metadata"]["resources"]["instances"],
        json!([format!("/api/v1/instances/{}", instance.id)])
    );
    assert!(body["metadata"]["resources"].get("containers").is_none());
    assert_eq!(harness.hypervisor.metadata_fetches(), 0);

    // Both references resolve against the same router.
    let instance_ref = body["metadata"]["resources"]["instances"][0].as_str().unwrap();
    let (status, fetched) = harness.get("u1", instance_ref).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["metadata"]["id"], json!(instance.id));
    assert_eq!(fetched["metadata"]["name"], "vm1");

    let (status, operation) = harness.get("u1", body["operation"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(operation["type"], "sync");
    assert_eq!(
        operation["metadata"]["resources"]["instances"],
        json!([format!("/api/v1/instances/{}", instance.id)])
    );
}

/// Test: A success answer the control plane cannot read keeps the instance.
#[tokio::test]
async fn test_unreadable_acceptance_is_bad_gateway() {
    let harness = Harness::new(
        &["attach-network"],
        InMemoryHypervisor::new()
            .with_network("net1", None)
            .failing_create(HypervisorError::Decode("expected value at line 1".to_string())),
    );

    let (status, body) = harness.post("u1", vm1_request()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], 502);
    assert_eq!(body["type"], "error");
    let snapshot = harness.store.snapshot().unwrap();
    assert_eq!(snapshot.instances.len(), 1);
    assert_eq!(snapshot.authorizations.len(), 1);
    assert_eq!(harness.hypervisor.created()[0].name, snapshot.instances[0].id);

    let (status, listed) = harness.list("u1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["metadata"].as_array().unwrap().len(), 1);
}

/// Test: Missing create-instance at both scopes is 403.
#[tokio::test]
async fn test_without_create_permission_forbidden() {
    let harness = Harness::new(&["attach-network"], InMemoryHypervisor::new());

    let (status, body) = harness.post("u9", vm1_request()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({"code": 403, "error": "not allowed to perform this operation", "type": "error"})
    );
    assert_eq!(harness.store.instance_count().unwrap(), 0);
}

/// Test: Unknown node is a 400 before any permission check.
#[tokio::test]
async fn test_unknown_node_bad_request() {
    let harness = Harness::new(&[], InMemoryHypervisor::new());
    let mut request = vm1_request();
    request["node"] = json!("n404");

    let (status, body) = harness.post("u9", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad request: node does not exist");
}

/// Test: Hypervisor rejection is relayed verbatim after rollback.
#[tokio::test]
async fn test_remote_rejection_relayed() {
    let upstream = json!({
        "type": "error",
        "error": "Failed to load image alias",
        "error_code": 404,
        "metadata": null
    });
    let harness = Harness::new(
        &["attach-network"],
        InMemoryHypervisor::new().failing_create(HypervisorError::api(404, upstream.clone())),
    );

    let (status, body) = harness.post("u1", vm1_request()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, upstream);
    assert_eq!(harness.store.instance_count().unwrap(), 0);
}

/// Test: Listing returns only instances the caller has a grant on.
#[tokio::test]
async fn test_listing_filters_by_grant() {
    let harness = Harness::new(&[], InMemoryHypervisor::new());
    let visible = harness
        .store
        .create_instance(Instance::new("visible", "n1"))
        .await
        .unwrap();
    harness
        .store
        .create_instance(Instance::new("hidden", "n1"))
        .await
        .unwrap();
    harness
        .store
        .create_authorizations(vec![InstanceAuthorization::new(&visible.id, "u1", "view")])
        .await
        .unwrap();

    let (status, body) = harness.list("u1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "sync");
    assert_eq!(body["status"], "Success");
    assert_eq!(body["status_code"], 200);
    assert_eq!(body["error_code"], 0);
    let metadata = body["metadata"].as_array().unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0]["id"], json!(visible.id));
    assert_eq!(metadata[0]["name"], "visible");
}

/// Test: Requests without a bearer token are rejected.
#[tokio::test]
async fn test_missing_token_unauthorized() {
    let harness = Harness::new(&[], InMemoryHypervisor::new());
    let request = Request::post("/api/v1/instances")
        .header("content-type", "application/json")
        .body(Body::from(vm1_request().to_string()))
        .unwrap();

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert_eq!(harness.store.instance_count().unwrap(), 0);
}
