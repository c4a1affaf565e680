//! Device and firmware fixtures.

use fleet_firmware::{
    CheckResult, DeviceDescriptor, FirmwareInfo, NATIVE_PLATFORM, StaticRegistry, UpdateEntry,
};

/// `count` native devices named `device-00`, `device-01`, ... at `10.0.0.x`
pub fn native_devices(count: usize) -> Vec<DeviceDescriptor> {
    (0..count)
        .map(|i| DeviceDescriptor::native(format!("device-{i:02}"), format!("10.0.0.{}", i + 1)))
        .collect()
}

/// `count` devices on `platform` named `<platform>-00`, ... at `10.1.0.x`
pub fn plugin_devices(platform: &str, count: usize) -> Vec<DeviceDescriptor> {
    (0..count)
        .map(|i| {
            DeviceDescriptor::plugin(
                format!("{platform}-{i:02}"),
                format!("10.1.0.{}", i + 1),
                platform,
            )
        })
        .collect()
}

/// Registry holding `devices`
pub fn registry(devices: &[DeviceDescriptor]) -> StaticRegistry {
    devices.iter().cloned().collect()
}

/// Native firmware info; an empty `available` or `beta` means none offered
pub fn firmware_info(current: &str, available: &str, beta: &str) -> FirmwareInfo {
    FirmwareInfo {
        current: current.to_string(),
        available: available.to_string(),
        beta: beta.to_string(),
        has_update: !available.is_empty() && available != current,
        device_model: "SNSW-001P16EU".to_string(),
        device_id: format!("fixture-{current}"),
        generation: 2,
        platform: NATIVE_PLATFORM.to_string(),
    }
}

/// Successful check result for `name`
pub fn check_ok(name: &str, available: &str, beta: &str) -> CheckResult {
    CheckResult::ok(name, firmware_info("1.0.0", available, beta))
}

/// Update entry for a native device `name` with the given flags
pub fn update_entry(name: &str, has_update: bool, has_beta: bool) -> UpdateEntry {
    UpdateEntry::new(
        DeviceDescriptor::native(name, ""),
        firmware_info(
            "1.0.0",
            if has_update { "1.1.0" } else { "" },
            if has_beta { "1.2.0-beta1" } else { "" },
        ),
    )
}
