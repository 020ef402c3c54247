//! # Hypervisor Errors

use serde_json::{json, Value};
use thiserror::Error;

/// Result type for hypervisor calls
pub type HypervisorResult<T> = Result<T, HypervisorError>;

/// Errors from talking to a hypervisor node
#[derive(Debug, Clone, Error)]
pub enum HypervisorError {
    /// The hypervisor answered with an error response
    #[error("hypervisor returned {status_code}")]
    Api {
        status_code: u16,
        /// Error body exactly as the hypervisor sent it
        body: Value,
    },

    /// The request never got an answer
    #[error("hypervisor unreachable: {0}")]
    Transport(String),

    /// The answer could not be decoded
    #[error("unexpected hypervisor response: {0}")]
    Decode(String),

    /// Node TLS material could not be opened or loaded
    #[error("node credentials unusable: {0}")]
    Credentials(String),
}

impl HypervisorError {
    /// Build an API error from a status and raw body
    ///
    /// The body's own `error_code` wins over the HTTP status when present.
    pub fn api(http_status: u16, body: Value) -> Self {
        let status_code = body
            .get("error_code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .filter(|code| (400..600).contains(code))
            .unwrap_or(http_status);
        Self::Api { status_code, body }
    }

    /// HTTP status to answer the caller with
    pub fn status_code(&self) -> u16 {
        match self {
            HypervisorError::Api { status_code, .. } => *status_code,
            HypervisorError::Transport(_) | HypervisorError::Decode(_) => 502,
            HypervisorError::Credentials(_) => 500,
        }
    }

    /// Body to answer the caller with
    ///
    /// API errors are passed through verbatim; anything else is wrapped in
    /// the hypervisor's own error shape.
    pub fn body(&self) -> Value {
        match self {
            HypervisorError::Api { body, .. } => body.clone(),
            other => json!({
                "type": "error",
                "error": other.to_string(),
                "error_code": other.status_code(),
            }),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::Api { status_code: 404, .. })
    }

    /// Whether the node answered with success before this error arose
    ///
    /// A create call that fails this way may have created the instance.
    pub fn accepted_by_node(&self) -> bool {
        matches!(self, HypervisorError::Decode(_))
    }
}
