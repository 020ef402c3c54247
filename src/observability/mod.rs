//! Observability for the control plane
//!
//! Structured JSON log lines keyed by a closed set of lifecycle events.
//! Observability is read-only: a failed write to stdout/stderr never
//! changes the outcome of a request.

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log a lifecycle event with fields
///
/// Divergence events go out at FATAL or ERROR, everything else at INFO.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
