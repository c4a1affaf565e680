//! Device registry

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::device::DeviceDescriptor;
use crate::error::FirmwareError;

/// Source of registered devices
pub trait DeviceRegistry: Send + Sync {
    /// Every registered device keyed by name
    fn list_devices(&self) -> BTreeMap<String, DeviceDescriptor>;

    /// Device registered as `name`
    fn get_device(&self, name: &str) -> Option<DeviceDescriptor>;

    /// Resolve `names` in order, failing on the first unknown name
    fn resolve(&self, names: &[String]) -> Result<Vec<DeviceDescriptor>, FirmwareError> {
        names
            .iter()
            .map(|name| {
                self.get_device(name)
                    .ok_or_else(|| FirmwareError::DeviceNotFound(name.clone()))
            })
            .collect()
    }
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct StaticRegistry {
    devices: RwLock<BTreeMap<String, DeviceDescriptor>>,
}

impl StaticRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device under its own name
    pub fn insert(&self, device: DeviceDescriptor) {
        self.devices.write().insert(device.name.clone(), device);
    }

    /// Remove a device
    pub fn remove(&self, name: &str) -> Option<DeviceDescriptor> {
        self.devices.write().remove(name)
    }
}

impl FromIterator<DeviceDescriptor> for StaticRegistry {
    fn from_iter<I: IntoIterator<Item = DeviceDescriptor>>(iter: I) -> Self {
        let devices = iter.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            devices: RwLock::new(devices),
        }
    }
}

impl DeviceRegistry for StaticRegistry {
    fn list_devices(&self) -> BTreeMap<String, DeviceDescriptor> {
        self.devices.read().clone()
    }

    fn get_device(&self, name: &str) -> Option<DeviceDescriptor> {
        self.devices.read().get(name).cloned()
    }
}
