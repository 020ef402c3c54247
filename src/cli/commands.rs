//! CLI command implementations
//!
//! `serve` wires the store, hypervisor connector and HTTP server together.
//! `token` and `seal` are offline operator helpers that only need the
//! configuration file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{JwtConfig, JwtManager, Principal};
use crate::http_server::{HttpServer, HttpServerConfig, InstanceState};
use crate::hypervisor::{HypervisorConfig, LxdConnector, NodeCipher, SealedCredentials};
use crate::observability::{log_event, Event};
use crate::provisioning::ProvisioningOrchestrator;
use crate::store::InMemoryStore;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address and CORS origins
    #[serde(default)]
    pub server: HttpServerConfig,

    /// Bearer token signing (required)
    pub jwt: JwtConfig,

    /// Base64 32-byte master key for node TLS material (required)
    pub node_secret: String,

    /// Store snapshot file (required)
    pub state_path: String,

    /// Hypervisor client settings
    #[serde(default)]
    pub hypervisor: HypervisorConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.jwt.secret.is_empty() {
            return Err(CliError::config_error("jwt.secret must not be empty"));
        }

        if self.jwt.access_token_ttl_secs <= 0 {
            return Err(CliError::config_error("jwt.access_token_ttl_secs must be > 0"));
        }

        if self.state_path.is_empty() {
            return Err(CliError::config_error("state_path must not be empty"));
        }

        if self.hypervisor.timeout_secs == 0 {
            return Err(CliError::config_error("hypervisor.timeout_secs must be > 0"));
        }

        self.node_cipher()?;

        Ok(())
    }

    /// Cipher for node TLS material
    pub fn node_cipher(&self) -> CliResult<NodeCipher> {
        NodeCipher::from_base64(&self.node_secret)
            .map_err(|e| CliError::config_error(format!("node_secret: {}", e)))
    }
}

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config } => serve(&config),
        Command::Token { config, user } => {
            let token = token(&config, &user)?;
            write_line(&token)
        }
        Command::Seal { config, cert, key } => {
            let sealed = seal(&config, &cert, &key)?;
            write_line(&serde_json::to_string_pretty(&sealed)?)
        }
    }
}

/// Open the store and serve the HTTP API until the process exits
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    log_event(
        Event::ConfigLoaded,
        &[("path", &config_path.display().to_string())],
    );

    let store = InMemoryStore::open(&config.state_path)
        .map_err(|e| CliError::boot_failed(format!("Failed to open store: {}", e)))?;
    log_event(Event::StoreOpened, &[("path", &config.state_path)]);

    let connector = LxdConnector::new(config.node_cipher()?, config.hypervisor.clone());
    let orchestrator = ProvisioningOrchestrator::new(Arc::new(store), Arc::new(connector));
    let state = Arc::new(InstanceState::new(
        orchestrator,
        JwtManager::new(config.jwt.clone()),
    ));
    let server = HttpServer::new(config.server.clone(), state);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Mint an access token for `user`
pub fn token(config_path: &Path, user: &str) -> CliResult<String> {
    let config = Config::load(config_path)?;
    if user.is_empty() {
        return Err(CliError::config_error("--user must not be empty"));
    }

    JwtManager::new(config.jwt)
        .generate_access_token(&Principal::new(user))
        .map_err(|e| CliError::boot_failed(e.to_string()))
}

/// Encrypt a PEM certificate and key for a node record
pub fn seal(config_path: &Path, cert_path: &Path, key_path: &Path) -> CliResult<SealedCredentials> {
    let config = Config::load(config_path)?;
    let certificate = fs::read_to_string(cert_path)?;
    let key = fs::read_to_string(key_path)?;

    config
        .node_cipher()?
        .seal(&certificate, &key)
        .map_err(|e| CliError::io_error(e.to_string()))
}

fn write_line(line: &str) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
