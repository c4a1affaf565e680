//! Device descriptors and platform dispatch

use serde::{Deserialize, Serialize};

/// Platform name reported for natively controlled devices.
pub const NATIVE_PLATFORM: &str = "shelly";

/// How a device is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Direct RPC to the device
    Native,

    /// Platform-specific plugin hooks
    Plugin(String),
}

impl DeviceKind {
    /// Platform name as reported in [`crate::model::FirmwareInfo::platform`].
    pub fn platform_name(&self) -> &str {
        match self {
            DeviceKind::Native => NATIVE_PLATFORM,
            DeviceKind::Plugin(platform) => platform,
        }
    }
}

/// Credentials passed to the connection layer or plugin hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuth {
    /// Username
    pub username: String,

    /// Password
    pub password: String,
}

/// A registered device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device name
    pub name: String,

    /// Network address
    pub address: String,

    /// Hardware model
    #[serde(default)]
    pub model: String,

    /// Platform name; empty means native
    #[serde(default)]
    pub platform: String,

    /// Optional credentials
    #[serde(default)]
    pub auth: Option<DeviceAuth>,
}

impl DeviceDescriptor {
    /// Create a native device descriptor.
    pub fn native(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// Create a plugin-managed device descriptor.
    pub fn plugin(
        name: impl Into<String>,
        address: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            platform: platform.into(),
            ..Default::default()
        }
    }

    /// Set the hardware model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(DeviceAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Resolve how this device is reached.
    ///
    /// An empty platform or the native platform name both mean native.
    pub fn kind(&self) -> DeviceKind {
        if self.platform.is_empty() || self.platform == NATIVE_PLATFORM {
            DeviceKind::Native
        } else {
            DeviceKind::Plugin(self.platform.clone())
        }
    }

    /// Identifier handed to the connection layer: the address, or the name
    /// when no address is known.
    pub fn identifier(&self) -> &str {
        if self.address.is_empty() {
            &self.name
        } else {
            &self.address
        }
    }

    /// Whether the device is only reachable through a plugin.
    pub fn is_plugin_managed(&self) -> bool {
        matches!(self.kind(), DeviceKind::Plugin(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_platform_is_native() {
        let device = DeviceDescriptor::native("plug", "10.0.0.2");
        assert_eq!(device.kind(), DeviceKind::Native);
        assert!(!device.is_plugin_managed());
        assert_eq!(device.kind().platform_name(), "shelly");
    }

    #[test]
    fn test_identifier_falls_back_to_name() {
        assert_eq!(DeviceDescriptor::native("plug", "10.0.0.2").identifier(), "10.0.0.2");
        assert_eq!(DeviceDescriptor::native("plug", "").identifier(), "plug");
    }

    #[test]
    fn test_explicit_native_platform_is_native() {
        let device = DeviceDescriptor::plugin("plug", "10.0.0.2", NATIVE_PLATFORM);
        assert_eq!(device.kind(), DeviceKind::Native);
    }

    #[test]
    fn test_other_platform_is_plugin() {
        let device = DeviceDescriptor::plugin("bulb", "10.0.0.3", "tasmota");
        assert_eq!(device.kind(), DeviceKind::Plugin("tasmota".to_string()));
        assert!(device.is_plugin_managed());
        assert_eq!(device.kind().platform_name(), "tasmota");
    }
}
