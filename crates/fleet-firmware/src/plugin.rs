//! Plugin hook interface for devices managed by external platform adapters

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::device::DeviceAuth;
use crate::error::FirmwareError;
use crate::model::ReleaseStage;

/// Decoded reply of the check-updates hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginUpdateCheck {
    /// Running firmware version
    pub current_version: String,

    /// Latest stable version, empty if none
    #[serde(default)]
    pub latest_stable: String,

    /// Latest beta version, empty if none
    #[serde(default)]
    pub latest_beta: String,

    /// Whether the plugin considers a stable update available
    pub has_update: bool,
}

/// Decoded reply of the apply-update hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginApplyResult {
    /// Whether the plugin started the update
    pub success: bool,

    /// Failure message reported by the plugin
    #[serde(default)]
    pub error: Option<String>,
}

/// Hooks exposed by one platform plugin.
///
/// Hooks return raw JSON; decoding happens on this side so a malformed payload
/// is reported uniformly as [`FirmwareError::PluginResponse`].
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Platform this plugin handles
    fn platform(&self) -> &str;

    /// Ask the platform which firmware versions are available
    async fn execute_check_updates(
        &self,
        address: &str,
        auth: Option<&DeviceAuth>,
    ) -> Result<Value, FirmwareError>;

    /// Ask the platform to install firmware
    async fn execute_apply_update(
        &self,
        address: &str,
        auth: Option<&DeviceAuth>,
        stage: ReleaseStage,
        url: Option<&str>,
    ) -> Result<Value, FirmwareError>;
}

/// Resolves platform names to plugins
pub trait PluginDispatcher: Send + Sync {
    /// Plugin registered for `platform`, if any
    fn find_by_platform(&self, platform: &str) -> Option<Arc<dyn PluginHooks>>;
}

/// In-memory plugin table
#[derive(Default)]
pub struct PluginTable {
    plugins: RwLock<HashMap<String, Arc<dyn PluginHooks>>>,
}

impl PluginTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` under its own platform name, replacing any previous one
    pub fn register(&self, plugin: Arc<dyn PluginHooks>) {
        let platform = plugin.platform().to_string();
        info!(platform = %platform, "Registered firmware plugin");
        self.plugins.write().insert(platform, plugin);
    }

    /// Registered platform names
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl PluginDispatcher for PluginTable {
    fn find_by_platform(&self, platform: &str) -> Option<Arc<dyn PluginHooks>> {
        self.plugins.read().get(platform).cloned()
    }
}

/// Decode a check-updates hook payload for `device`.
pub fn decode_check_response(
    device: &str,
    payload: Value,
) -> Result<PluginUpdateCheck, FirmwareError> {
    serde_json::from_value(payload).map_err(|e| FirmwareError::PluginResponse {
        device: device.to_string(),
        message: format!("check-updates: {e}"),
    })
}

/// Decode an apply-update hook payload for `device`.
pub fn decode_apply_response(
    device: &str,
    payload: Value,
) -> Result<PluginApplyResult, FirmwareError> {
    serde_json::from_value(payload).map_err(|e| FirmwareError::PluginResponse {
        device: device.to_string(),
        message: format!("apply-update: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_check_response() -> Result<(), FirmwareError> {
        let check = decode_check_response(
            "bulb",
            json!({
                "current_version": "9.1.0",
                "latest_stable": "9.2.0",
                "has_update": true
            }),
        )?;
        assert_eq!(check.latest_stable, "9.2.0");
        assert_eq!(check.latest_beta, "");
        assert!(check.has_update);
        Ok(())
    }

    #[test]
    fn test_decode_check_response_rejects_malformed_payload() {
        let result = decode_check_response("bulb", json!({ "current_version": 12 }));
        match result {
            Err(FirmwareError::PluginResponse { device, message }) => {
                assert_eq!(device, "bulb");
                assert!(message.starts_with("check-updates"));
            }
            other => panic!("expected PluginResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_apply_response_defaults_error() -> Result<(), FirmwareError> {
        let result = decode_apply_response("bulb", json!({ "success": true }))?;
        assert!(result.success);
        assert!(result.error.is_none());
        Ok(())
    }
}
