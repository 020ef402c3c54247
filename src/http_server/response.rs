//! # Response Formatting
//!
//! Successful reads use the same synchronous envelope as the hypervisor API.

use serde::Serialize;

/// Synchronous response envelope
#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse<T: Serialize> {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub status: &'static str,
    pub status_code: u16,
    pub operation: String,
    pub error_code: u16,
    pub error: String,
    pub metadata: T,
}

impl<T: Serialize> SyncResponse<T> {
    pub fn success(metadata: T) -> Self {
        Self {
            response_type: "sync",
            status: "Success",
            status_code: 200,
            operation: String::new(),
            error_code: 0,
            error: String::new(),
            metadata,
        }
    }
}
