//! Device authorization.
//!
//! Every non-root device is checked independently and concurrently. The
//! step is a barrier: all checks run to completion, then the first failure
//! in device-key order is returned, however the checks interleaved.

use futures_util::future::join_all;

use crate::auth::Principal;
use crate::hypervisor::{Device, DeviceKind, Devices, HypervisorClient, ROOT_DEVICE};
use crate::permissions::{EffectivePermissions, ATTACH, ATTACH_NETWORK, ATTACH_VOLUME};

use super::annotation::PermissionAnnotation;
use super::errors::{AuthorizationError, AuthorizationResult, ResourceKind};

/// Checks whether a principal may attach the resources an instance references
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAuthorizationChecker;

impl ResourceAuthorizationChecker {
    pub fn new() -> Self {
        Self
    }

    /// Authorize every device of a new instance except `root`
    pub async fn authorize(
        &self,
        principal: &Principal,
        client: &dyn HypervisorClient,
        devices: &Devices,
        permissions: &EffectivePermissions,
    ) -> AuthorizationResult<()> {
        let checks = devices
            .iter()
            .filter(|(name, _)| name.as_str() != ROOT_DEVICE)
            .map(|(name, device)| check_device(principal, client, name, device, permissions));

        // join_all keeps input order, so the first Err is the first by key.
        join_all(checks).await.into_iter().collect()
    }
}

async fn check_device(
    principal: &Principal,
    client: &dyn HypervisorClient,
    name: &str,
    device: &Device,
    permissions: &EffectivePermissions,
) -> AuthorizationResult<()> {
    match device.kind() {
        DeviceKind::Disk => {
            if permissions.allows(ATTACH_VOLUME) {
                return Ok(());
            }
            let pool = required(device, name, "pool")?;
            let source = required(device, name, "source")?;

            let volumes = match client.storage_volumes(pool).await {
                Ok(volumes) => volumes,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(AuthorizationError::Upstream(e)),
            };
            let volume = volumes
                .iter()
                .find(|volume| volume.name == source)
                .ok_or_else(|| AuthorizationError::ResourceNotFound {
                    kind: ResourceKind::Volume,
                    name: source.to_string(),
                })?;

            check_annotation(
                principal,
                ResourceKind::Volume,
                source,
                volume.permission_annotation(),
            )
        }
        DeviceKind::Nic => {
            if permissions.allows(ATTACH_NETWORK) {
                return Ok(());
            }
            let network_name = required(device, name, "network")?;

            let network = client
                .network(network_name)
                .await
                .map_err(AuthorizationError::Upstream)?
                .ok_or_else(|| AuthorizationError::ResourceNotFound {
                    kind: ResourceKind::Network,
                    name: network_name.to_string(),
                })?;

            check_annotation(
                principal,
                ResourceKind::Network,
                network_name,
                network.permission_annotation(),
            )
        }
        DeviceKind::Other => Ok(()),
    }
}

fn required<'a>(
    device: &'a Device,
    name: &str,
    field: &'static str,
) -> AuthorizationResult<&'a str> {
    device
        .property(field)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AuthorizationError::InvalidDevice {
            device: name.to_string(),
            field,
        })
}

fn check_annotation(
    principal: &Principal,
    kind: ResourceKind,
    name: &str,
    raw: Option<&str>,
) -> AuthorizationResult<()> {
    let missing = || AuthorizationError::PermissionMetadataMissing {
        kind,
        name: name.to_string(),
    };

    let annotation = raw
        .and_then(|raw| PermissionAnnotation::decode(raw).ok())
        .ok_or_else(missing)?;

    if annotation.grants_for(principal).contains(ATTACH) {
        Ok(())
    } else {
        Err(AuthorizationError::Forbidden {
            kind,
            name: name.to_string(),
        })
    }
}
