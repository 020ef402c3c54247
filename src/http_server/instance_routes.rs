//! Instance HTTP Routes
//!
//! `POST /instances` provisions an instance, `GET /instances` lists the
//! ones the caller holds a grant on and `GET /instances/:id` reads one.
//! `GET /nodes/:node/operations/:id` follows the operation reference an
//! accepted create returns. All of them require a bearer token and are
//! mounted under `/api/v1`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Router,
};

use crate::auth::{JwtManager, Principal};
use crate::hypervisor::{OperationEnvelope, OperationMetadata};
use crate::provisioning::{CreateInstanceRequest, ProvisioningOrchestrator};
use crate::store::Instance;

use super::errors::{ApiError, ApiResult};
use super::response::SyncResponse;

/// Shared state of the instance routes
pub struct InstanceState {
    pub orchestrator: ProvisioningOrchestrator,
    pub jwt: JwtManager,
}

impl InstanceState {
    pub fn new(orchestrator: ProvisioningOrchestrator, jwt: JwtManager) -> Self {
        Self { orchestrator, jwt }
    }

    fn authenticate(&self, headers: &HeaderMap) -> ApiResult<Principal> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        Ok(self.jwt.decode_header(header)?)
    }
}

/// Instance routes with shared state
pub fn instance_routes(state: Arc<InstanceState>) -> Router {
    Router::new()
        .route(
            "/instances",
            get(list_instances_handler).post(create_instance_handler),
        )
        .route("/instances/:id", get(get_instance_handler))
        .route("/nodes/:node/operations/:id", get(get_operation_handler))
        .with_state(state)
}

/// Create an instance; answers 202 with the rewritten operation
async fn create_instance_handler(
    State(state): State<Arc<InstanceState>>,
    headers: HeaderMap,
    body: Result<Json<CreateInstanceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OperationEnvelope>)> {
    let principal = state.authenticate(&headers)?;
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let operation = state.orchestrator.provision(&principal, request).await?;
    Ok((StatusCode::ACCEPTED, Json(operation)))
}

/// List instances visible to the caller
async fn list_instances_handler(
    State(state): State<Arc<InstanceState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SyncResponse<Vec<Instance>>>> {
    let principal = state.authenticate(&headers)?;

    let instances = state.orchestrator.list_instances(&principal).await?;
    Ok(Json(SyncResponse::success(instances)))
}

async fn get_instance_handler(
    State(state): State<Arc<InstanceState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SyncResponse<Instance>>> {
    let principal = state.authenticate(&headers)?;

    let instance = state.orchestrator.get_instance(&principal, &id).await?;
    Ok(Json(SyncResponse::success(instance)))
}

/// Operation state from the node, resource paths rewritten
async fn get_operation_handler(
    State(state): State<Arc<InstanceState>>,
    Path((node, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<SyncResponse<OperationMetadata>>> {
    let principal = state.authenticate(&headers)?;

    let metadata = state.orchestrator.operation(&principal, &node, &id).await?;
    Ok(Json(SyncResponse::success(metadata)))
}
