//! CLI argument definitions using clap
//!
//! Commands:
//! - nodegate serve --config <path>
//! - nodegate token --config <path> --user <id>
//! - nodegate seal --config <path> --cert <pem> --key <pem>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nodegate - authorization-gated instance provisioning
#[derive(Parser, Debug)]
#[command(name = "nodegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./nodegate.json")]
        config: PathBuf,
    },

    /// Mint a bearer token for a principal
    Token {
        /// Path to configuration file
        #[arg(long, default_value = "./nodegate.json")]
        config: PathBuf,

        /// Principal id placed in the `sub` claim
        #[arg(long)]
        user: String,
    },

    /// Encrypt a node's client certificate and key for its store record
    Seal {
        /// Path to configuration file
        #[arg(long, default_value = "./nodegate.json")]
        config: PathBuf,

        /// PEM client certificate
        #[arg(long)]
        cert: PathBuf,

        /// PEM private key
        #[arg(long)]
        key: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
