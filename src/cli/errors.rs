//! CLI-specific error types
//!
//! Every CLI error is fatal: it is printed and the process exits non-zero.

use std::io;

use thiserror::Error;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, malformed or invalid
    #[error("NODEGATE_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    /// Reading input files or writing output failed
    #[error("NODEGATE_CLI_IO_ERROR: {0}")]
    Io(String),

    /// Store, runtime or server could not be started
    #[error("NODEGATE_CLI_BOOT_FAILED: {0}")]
    BootFailed(String),
}

impl CliError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "NODEGATE_CLI_CONFIG_ERROR",
            CliError::Io(_) => "NODEGATE_CLI_IO_ERROR",
            CliError::BootFailed(_) => "NODEGATE_CLI_BOOT_FAILED",
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        CliError::Io(msg.into())
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        CliError::BootFailed(msg.into())
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}
