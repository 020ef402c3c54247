//! # HTTP Server Module
//!
//! axum surface of the control plane.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /instances` - Provision an instance on a node
//! - `GET /instances` - Instances the caller holds a grant on

pub mod config;
pub mod errors;
pub mod health_routes;
pub mod instance_routes;
pub mod response;
pub mod server;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ApiResult};
pub use instance_routes::InstanceState;
pub use server::HttpServer;
