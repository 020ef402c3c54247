//! # HTTP Errors
//!
//! Maps auth and provisioning failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::provisioning::ProvisioningError;

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors a handler can answer with
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Request body is not a valid create request
    #[error("bad request: {0}")]
    InvalidBody(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        let code = match self {
            ApiError::Auth(e) => e.status_code(),
            ApiError::Provisioning(e) => e.status_code(),
            ApiError::InvalidBody(_) => 400,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// `{code, error, type}` envelope, or the hypervisor's body verbatim
    pub fn body(&self) -> Value {
        match self {
            ApiError::Provisioning(e) => e.body(),
            other => json!({
                "code": other.status_code().as_u16(),
                "error": other.to_string(),
                "type": "error",
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
