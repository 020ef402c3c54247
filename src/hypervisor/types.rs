//! Hypervisor request and response shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Config key holding a resource's permission annotation
pub const PERMISSIONS_CONFIG_KEY: &str = "user.permissions";

/// Device key of an instance's implicit root disk
pub const ROOT_DEVICE: &str = "root";

/// Storage volume in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    pub name: String,
    #[serde(rename = "type", default)]
    pub volume_type: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl StorageVolume {
    /// Raw permission annotation, if the volume carries one
    pub fn permission_annotation(&self) -> Option<&str> {
        self.config.get(PERMISSIONS_CONFIG_KEY).map(String::as_str)
    }
}

/// Managed network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Network {
    /// Raw permission annotation, if the network carries one
    pub fn permission_annotation(&self) -> Option<&str> {
        self.config.get(PERMISSIONS_CONFIG_KEY).map(String::as_str)
    }
}

/// Broad class of a device entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Disk,
    Nic,
    Other,
}

/// One entry of an instance's device map
///
/// Only `type` is interpreted; every other property is forwarded to the
/// hypervisor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        match self.device_type.as_str() {
            "disk" => DeviceKind::Disk,
            "nic" => DeviceKind::Nic,
            _ => DeviceKind::Other,
        }
    }

    /// String property by key
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Device map keyed by device name, iterated in stable key order
pub type Devices = BTreeMap<String, Device>;

/// Body of an instance create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceCreateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default)]
    pub source: Value,
}

/// Resources touched by an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResources {
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata of a background operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<OperationResources>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Async operation envelope returned when the hypervisor accepts a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    /// Path of the operation resource
    pub operation: String,
    #[serde(default)]
    pub metadata: OperationMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Sync response wrapper for metadata reads
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SyncResponse<T> {
    pub metadata: T,
}
