//! Error types for fleet firmware operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while checking or updating devices.
///
/// Per-device variants always carry the device name so a message recorded in a
/// scan or update result is meaningful on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareError {
    /// Device unreachable or authentication failed
    #[error("Connection to device {device} failed: {message}")]
    Connection {
        /// Device name
        device: String,
        /// Underlying cause
        message: String,
    },

    /// No plugin is registered for the device's platform
    #[error("No plugin registered for platform '{platform}' (device {device})")]
    PluginNotFound {
        /// Device name
        device: String,
        /// Platform the device declared
        platform: String,
    },

    /// Plugin hook returned a payload that could not be decoded
    #[error("Malformed plugin response from device {device}: {message}")]
    PluginResponse {
        /// Device name
        device: String,
        /// Decoding failure
        message: String,
    },

    /// Device reported that the update failed
    #[error("Firmware update failed on device {device}: {message}")]
    UpdateFailed {
        /// Device name
        device: String,
        /// Device-reported failure message
        message: String,
    },

    /// Operation has no implementation for this kind of device
    #[error("Operation '{operation}' is not supported by device {device}")]
    Unsupported {
        /// Device name
        device: String,
        /// Operation that was requested
        operation: String,
    },

    /// Work for the device was interrupted by cancellation
    #[error("Operation on device {device} was cancelled")]
    Cancelled {
        /// Device name
        device: String,
    },

    /// Device is not present in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache persistence failure
    #[error("Cache error: {0}")]
    Cache(String),
}

/// Coarse classification of a [`FirmwareError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport or authentication failure
    Connection,
    /// Plugin lookup failure
    PluginNotFound,
    /// Plugin payload decoding failure
    PluginResponse,
    /// Device-side update failure
    UpdateFailed,
    /// Unsupported operation
    Unsupported,
    /// Cancellation
    Cancelled,
    /// Registry lookup failure
    NotFound,
    /// Configuration or persistence failure
    Internal,
}

impl FirmwareError {
    /// Build a connection error for `device` from any displayable cause.
    pub fn connection(device: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        FirmwareError::Connection {
            device: device.into(),
            message: cause.to_string(),
        }
    }

    /// Build an update failure for `device`.
    pub fn update_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        FirmwareError::UpdateFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Build an unsupported-operation error for `device`.
    pub fn unsupported(device: impl Into<String>, operation: impl Into<String>) -> Self {
        FirmwareError::Unsupported {
            device: device.into(),
            operation: operation.into(),
        }
    }

    /// Re-attribute a per-device error to `name`.
    ///
    /// Connection providers and plugins report against whatever identifier they
    /// were given; callers use this so results always name the registered device.
    pub fn with_device(self, name: &str) -> Self {
        let name = name.to_string();
        match self {
            FirmwareError::Connection { message, .. } => FirmwareError::Connection {
                device: name,
                message,
            },
            FirmwareError::PluginNotFound { platform, .. } => FirmwareError::PluginNotFound {
                device: name,
                platform,
            },
            FirmwareError::PluginResponse { message, .. } => FirmwareError::PluginResponse {
                device: name,
                message,
            },
            FirmwareError::UpdateFailed { message, .. } => FirmwareError::UpdateFailed {
                device: name,
                message,
            },
            FirmwareError::Unsupported { operation, .. } => FirmwareError::Unsupported {
                device: name,
                operation,
            },
            FirmwareError::Cancelled { .. } => FirmwareError::Cancelled { device: name },
            other @ (FirmwareError::DeviceNotFound(_)
            | FirmwareError::Config(_)
            | FirmwareError::Cache(_)) => other,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FirmwareError::Connection { .. } => ErrorKind::Connection,
            FirmwareError::PluginNotFound { .. } => ErrorKind::PluginNotFound,
            FirmwareError::PluginResponse { .. } => ErrorKind::PluginResponse,
            FirmwareError::UpdateFailed { .. } => ErrorKind::UpdateFailed,
            FirmwareError::Unsupported { .. } => ErrorKind::Unsupported,
            FirmwareError::Cancelled { .. } => ErrorKind::Cancelled,
            FirmwareError::DeviceNotFound(_) => ErrorKind::NotFound,
            FirmwareError::Config(_) | FirmwareError::Cache(_) => ErrorKind::Internal,
        }
    }

    /// Name of the device the error refers to, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            FirmwareError::Connection { device, .. }
            | FirmwareError::PluginNotFound { device, .. }
            | FirmwareError::PluginResponse { device, .. }
            | FirmwareError::UpdateFailed { device, .. }
            | FirmwareError::Unsupported { device, .. }
            | FirmwareError::Cancelled { device } => Some(device),
            FirmwareError::DeviceNotFound(name) => Some(name),
            FirmwareError::Config(_) | FirmwareError::Cache(_) => None,
        }
    }

    /// Whether the error was caused by cancellation rather than the device.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FirmwareError::Cancelled { .. })
    }
}
