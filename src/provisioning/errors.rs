//! # Provisioning Errors
//!
//! Authorization failures are resolved before any durable write and need
//! no rollback. Only failures after the instance row exists trigger one,
//! and a failed rollback is the single fatal condition. A create the node
//! accepted but answered unreadably is never rolled back.

use std::fmt;

use serde_json::{json, Value};
use thiserror::Error;

use crate::hypervisor::HypervisorError;
use crate::store::StoreError;

/// Result type for device authorization
pub type AuthorizationResult<T> = Result<T, AuthorizationError>;

/// Result type for the provisioning workflow
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Remote resource an attach is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Volume,
    Network,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Volume => f.write_str("volume"),
            ResourceKind::Network => f.write_str("network"),
        }
    }
}

/// Why a device may not be attached
#[derive(Debug, Clone, Error)]
pub enum AuthorizationError {
    /// Referenced volume or network does not exist on the node
    #[error("bad request: {kind} does not exist")]
    ResourceNotFound { kind: ResourceKind, name: String },

    /// Resource has no usable permission annotation
    #[error("bad request: {kind} does not have user.permissions")]
    PermissionMetadataMissing { kind: ResourceKind, name: String },

    /// Annotation does not grant `attach` to the caller
    #[error("bad request: user does not have permissions to attach {kind}")]
    Forbidden { kind: ResourceKind, name: String },

    /// Device lacks the fields needed to identify its resource
    #[error("bad request: device {device} is missing {field}")]
    InvalidDevice { device: String, field: &'static str },

    /// Resource metadata could not be fetched
    #[error("failed to fetch resource metadata: {0}")]
    Upstream(HypervisorError),
}

impl AuthorizationError {
    pub fn status_code(&self) -> u16 {
        match self {
            AuthorizationError::Upstream(_) => 502,
            _ => 400,
        }
    }
}

/// Workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Resolving,
    Authorizing,
    Persisting,
    RemoteProvisioning,
    /// Terminal: hypervisor accepted the instance
    Succeeded,
    /// Terminal: client error before any durable write
    Rejected,
    /// Terminal: durable record removed after a downstream failure
    RolledBack,
    /// Terminal: rollback failed, durable and remote state diverged
    Inconsistent,
    /// Terminal: node accepted the create but its answer was unreadable
    Unconfirmed,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Resolving => "RESOLVING",
            ProvisioningState::Authorizing => "AUTHORIZING",
            ProvisioningState::Persisting => "PERSISTING",
            ProvisioningState::RemoteProvisioning => "REMOTE_PROVISIONING",
            ProvisioningState::Succeeded => "SUCCEEDED",
            ProvisioningState::Rejected => "REJECTED",
            ProvisioningState::RolledBack => "ROLLED_BACK",
            ProvisioningState::Inconsistent => "INCONSISTENT",
            ProvisioningState::Unconfirmed => "UNCONFIRMED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded
                | ProvisioningState::Rejected
                | ProvisioningState::RolledBack
                | ProvisioningState::Inconsistent
                | ProvisioningState::Unconfirmed
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning workflow errors
#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    /// Target node id does not exist
    #[error("bad request: node does not exist")]
    NodeNotFound(String),

    /// Neither node nor platform scope grants `create-instance`
    #[error("not allowed to perform this operation")]
    PermissionDenied,

    /// A device failed authorization
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Could not open a client for the node
    #[error("failed to connect to node: {0}")]
    Connect(HypervisorError),

    /// Store failure before anything was written
    #[error("store error: {0}")]
    Store(StoreError),

    /// User grants could not be committed; the instance was rolled back
    #[error("failed to grant instance users: {source_error}")]
    GrantFailed {
        instance_id: String,
        source_error: StoreError,
    },

    /// Hypervisor rejected the create call; the instance was rolled back
    #[error("remote provisioning failed: {0}")]
    RemoteProvisioning(HypervisorError),

    /// Node answered the create with success but the answer did not decode
    ///
    /// The instance row is kept since the node may now run the instance.
    #[error("hypervisor accepted instance {instance_id} but its response could not be read: {source_error}")]
    Unconfirmed {
        instance_id: String,
        source_error: HypervisorError,
    },

    /// Instance is unknown or not visible to the caller
    #[error("instance not found")]
    InstanceNotFound(String),

    /// Operation lookup on the node failed
    #[error("operation lookup failed: {0}")]
    Operation(HypervisorError),

    /// Rollback after a downstream failure failed
    #[error("inconsistent state: instance {instance_id} could not be rolled back after \"{cause}\": {rollback}")]
    Inconsistent {
        instance_id: String,
        cause: Box<ProvisioningError>,
        rollback: StoreError,
    },
}

impl ProvisioningError {
    /// HTTP status to answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ProvisioningError::NodeNotFound(_) => 400,
            ProvisioningError::PermissionDenied => 403,
            ProvisioningError::Authorization(e) => e.status_code(),
            ProvisioningError::Connect(e) => e.status_code(),
            ProvisioningError::Store(_) => 500,
            ProvisioningError::GrantFailed { source_error, .. } => {
                if source_error.is_client_error() {
                    400
                } else {
                    500
                }
            }
            ProvisioningError::RemoteProvisioning(e) => e.status_code(),
            ProvisioningError::Unconfirmed { .. } => 502,
            ProvisioningError::InstanceNotFound(_) => 404,
            ProvisioningError::Operation(e) => e.status_code(),
            ProvisioningError::Inconsistent { .. } => 500,
        }
    }

    /// Response body
    ///
    /// Hypervisor rejections are relayed verbatim; everything else uses the
    /// control plane's `{code, error, type}` envelope.
    pub fn body(&self) -> Value {
        match self {
            ProvisioningError::RemoteProvisioning(e) | ProvisioningError::Operation(e) => e.body(),
            other => json!({
                "code": other.status_code(),
                "error": other.to_string(),
                "type": "error",
            }),
        }
    }

    /// Terminal state this error leaves the workflow in
    pub fn terminal_state(&self) -> ProvisioningState {
        match self {
            ProvisioningError::GrantFailed { .. } | ProvisioningError::RemoteProvisioning(_) => {
                ProvisioningState::RolledBack
            }
            ProvisioningError::Inconsistent { .. } => ProvisioningState::Inconsistent,
            ProvisioningError::Unconfirmed { .. } => ProvisioningState::Unconfirmed,
            _ => ProvisioningState::Rejected,
        }
    }

    /// Operator-visible, never client-recoverable
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProvisioningError::Inconsistent { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_use_envelope() {
        let err = ProvisioningError::from(AuthorizationError::ResourceNotFound {
            kind: ResourceKind::Network,
            name: "net1".to_string(),
        });
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.body(),
            json!({"code": 400, "error": "bad request: network does not exist", "type": "error"})
        );
        assert_eq!(err.terminal_state(), ProvisioningState::Rejected);
    }

    #[test]
    fn test_permission_denied_body() {
        let err = ProvisioningError::PermissionDenied;
        assert_eq!(
            err.body(),
            json!({"code": 403, "error": "not allowed to perform this operation", "type": "error"})
        );
    }

    #[test]
    fn test_remote_failure_body_is_verbatim() {
        let upstream = json!({"type": "error", "error": "Invalid config", "error_code": 400, "metadata": null});
        let err = ProvisioningError::RemoteProvisioning(HypervisorError::api(400, upstream.clone()));

        assert_eq!(err.status_code(), 400);
        assert_eq!(err.body(), upstream);
        assert_eq!(err.terminal_state(), ProvisioningState::RolledBack);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_inconsistent_is_distinct_and_fatal() {
        let cause = ProvisioningError::RemoteProvisioning(HypervisorError::api(
            400,
            json!({"type": "error", "error": "Invalid config", "error_code": 400}),
        ));
        let err = ProvisioningError::Inconsistent {
            instance_id: "i1".to_string(),
            cause: Box::new(cause),
            rollback: StoreError::Storage("disk full".to_string()),
        };

        assert!(err.is_fatal());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.terminal_state(), ProvisioningState::Inconsistent);
        let body = err.body();
        assert_eq!(body["type"], "error");
        assert!(body["error"].as_str().unwrap().starts_with("inconsistent state"));
    }

    #[test]
    fn test_unconfirmed_keeps_record_state() {
        let err = ProvisioningError::Unconfirmed {
            instance_id: "i1".to_string(),
            source_error: HypervisorError::Decode("missing field `operation`".to_string()),
        };

        assert_eq!(err.status_code(), 502);
        assert_eq!(err.terminal_state(), ProvisioningState::Unconfirmed);
        assert!(!err.is_fatal());
        let body = err.body();
        assert_eq!(body["code"], 502);
        assert!(body["error"].as_str().unwrap().contains("instance i1"));
    }

    #[test]
    fn test_operation_lookup_failure_is_verbatim() {
        let upstream = json!({"type": "error", "error": "Operation not found", "error_code": 404});
        let err = ProvisioningError::Operation(HypervisorError::api(404, upstream.clone()));
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.body(), upstream);
        assert_eq!(ProvisioningError::InstanceNotFound("i9".to_string()).status_code(), 404);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Inconsistent.is_terminal());
        assert!(ProvisioningState::Unconfirmed.is_terminal());
        assert!(!ProvisioningState::Persisting.is_terminal());
    }
}
