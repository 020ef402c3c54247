//! CLI module for nodegate
//!
//! Provides command-line interface for:
//! - serve: Open the store and run the HTTP API
//! - token: Mint a bearer token
//! - seal: Encrypt node TLS material

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{run, run_command, seal, serve, token, Config};
pub use errors::{CliError, CliResult};
