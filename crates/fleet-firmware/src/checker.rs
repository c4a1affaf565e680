//! Per-device firmware queries, dispatched on [`DeviceKind`]

use std::sync::Arc;
use tracing::debug;

use crate::connection::{ConnectionProvider, NativeUpdateCheck, with_connection};
use crate::device::{DeviceDescriptor, DeviceKind, NATIVE_PLATFORM};
use crate::error::FirmwareError;
use crate::model::{FirmwareInfo, FirmwareStatus};
use crate::plugin::{PluginDispatcher, PluginHooks, PluginUpdateCheck, decode_check_response};

/// Queries update availability for single devices.
///
/// Checks are pure queries: nothing is cached and nothing on the device changes.
#[derive(Clone)]
pub struct FirmwareChecker {
    connections: Arc<dyn ConnectionProvider>,
    plugins: Arc<dyn PluginDispatcher>,
}

impl FirmwareChecker {
    /// Create a checker over the given collaborators
    pub fn new(connections: Arc<dyn ConnectionProvider>, plugins: Arc<dyn PluginDispatcher>) -> Self {
        Self {
            connections,
            plugins,
        }
    }

    /// Determine which firmware `device` runs and what it is offered.
    pub async fn check(&self, device: &DeviceDescriptor) -> Result<FirmwareInfo, FirmwareError> {
        let info = match device.kind() {
            DeviceKind::Native => self.check_native(device).await,
            DeviceKind::Plugin(platform) => self.check_plugin(device, &platform).await,
        }
        .map_err(|e| e.with_device(&device.name))?;

        debug!(
            device = %device.name,
            current = %info.current,
            has_update = info.has_update,
            "Checked firmware"
        );
        Ok(info)
    }

    /// Read the live update status of a native device.
    pub async fn status(&self, device: &DeviceDescriptor) -> Result<FirmwareStatus, FirmwareError> {
        match device.kind() {
            DeviceKind::Native => with_connection(self.connections.as_ref(), device.identifier(), |conn| {
                Box::pin(async move { conn.firmware_status().await })
            })
            .await
            .map_err(|e| e.with_device(&device.name)),
            DeviceKind::Plugin(_) => Err(FirmwareError::unsupported(&device.name, "status")),
        }
    }

    async fn check_native(&self, device: &DeviceDescriptor) -> Result<FirmwareInfo, FirmwareError> {
        let check = with_connection(self.connections.as_ref(), device.identifier(), |conn| {
            Box::pin(async move { conn.check_for_update().await })
        })
        .await?;

        Ok(native_info(check))
    }

    async fn check_plugin(
        &self,
        device: &DeviceDescriptor,
        platform: &str,
    ) -> Result<FirmwareInfo, FirmwareError> {
        let plugin = self.plugin_for(device, platform)?;
        let payload = plugin
            .execute_check_updates(&device.address, device.auth.as_ref())
            .await?;
        let check = decode_check_response(&device.name, payload)?;

        Ok(plugin_info(device, check))
    }

    pub(crate) fn connections(&self) -> &dyn ConnectionProvider {
        self.connections.as_ref()
    }

    pub(crate) fn plugin_for(
        &self,
        device: &DeviceDescriptor,
        platform: &str,
    ) -> Result<Arc<dyn PluginHooks>, FirmwareError> {
        self.plugins
            .find_by_platform(platform)
            .ok_or_else(|| FirmwareError::PluginNotFound {
                device: device.name.clone(),
                platform: platform.to_string(),
            })
    }
}

fn native_info(check: NativeUpdateCheck) -> FirmwareInfo {
    let available = check.stable.unwrap_or_default();
    FirmwareInfo {
        has_update: offers_update(&check.current_version, &available),
        current: check.current_version,
        available,
        beta: check.beta.unwrap_or_default(),
        device_model: check.model,
        device_id: check.device_id,
        generation: check.generation,
        platform: NATIVE_PLATFORM.to_string(),
    }
}

fn plugin_info(device: &DeviceDescriptor, check: PluginUpdateCheck) -> FirmwareInfo {
    FirmwareInfo {
        current: check.current_version,
        available: check.latest_stable,
        beta: check.latest_beta,
        has_update: check.has_update,
        device_model: device.model.clone(),
        device_id: device.name.clone(),
        generation: 0,
        platform: device.platform.clone(),
    }
}

/// Whether `offered` is an update over `current`.
///
/// Semantic versions are compared when both parse (a leading `v` is ignored);
/// otherwise any non-empty offer different from the running version counts.
pub fn offers_update(current: &str, offered: &str) -> bool {
    if offered.is_empty() {
        return false;
    }

    let parse = |v: &str| semver::Version::parse(v.trim_start_matches('v'));
    match (parse(current), parse(offered)) {
        (Ok(current), Ok(offered)) => offered > current,
        _ => offered != current,
    }
}
