//! Lifecycle events emitted by the control plane.

use std::fmt;

use super::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Process lifecycle
    /// Configuration loaded
    ConfigLoaded,
    /// Durable store opened
    StoreOpened,
    /// HTTP server listening
    ServerStarted,

    // Provisioning workflow
    /// Create request received
    ProvisionRequested,
    /// All devices authorized
    ProvisionAuthorized,
    /// Request rejected before any durable write
    ProvisionRejected,
    /// Instance row and user grants committed
    InstancePersisted,
    /// Hypervisor accepted the create operation
    ProvisionAccepted,
    /// Remote provisioning failed, durable record removed
    ProvisionRolledBack,
    /// Rollback failed; durable and remote state diverged
    ProvisionInconsistent,
    /// Node accepted the create but its answer was unreadable
    ProvisionUnconfirmed,

    // Read path
    /// Instance listing served
    InstancesListed,
}

impl Event {
    /// Returns the event name string
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::StoreOpened => "STORE_OPENED",
            Event::ServerStarted => "SERVER_STARTED",
            Event::ProvisionRequested => "PROVISION_REQUESTED",
            Event::ProvisionAuthorized => "PROVISION_AUTHORIZED",
            Event::ProvisionRejected => "PROVISION_REJECTED",
            Event::InstancePersisted => "INSTANCE_PERSISTED",
            Event::ProvisionAccepted => "PROVISION_ACCEPTED",
            Event::ProvisionRolledBack => "PROVISION_ROLLED_BACK",
            Event::ProvisionInconsistent => "PROVISION_INCONSISTENT",
            Event::ProvisionUnconfirmed => "PROVISION_UNCONFIRMED",
            Event::InstancesListed => "INSTANCES_LISTED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::ProvisionInconsistent => Severity::Fatal,
            Event::ProvisionUnconfirmed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
