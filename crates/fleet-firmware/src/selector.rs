//! Update selection: joining scan results, stage filtering and staged rollout
//!
//! Everything here except [`UpdateSelector`] is a pure function over slices.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::device::DeviceDescriptor;
use crate::model::{CheckResult, ReleaseStage, UpdateEntry};
use crate::registry::DeviceRegistry;
use crate::scanner::FleetScanner;

/// Join scan results with registry records.
///
/// Failed checks and devices with neither a stable nor a beta update are
/// dropped, as are results for devices the registry no longer knows. The list
/// is sorted by device name.
pub fn build_update_list(results: &[CheckResult], registry: &dyn DeviceRegistry) -> Vec<UpdateEntry> {
    let mut entries: Vec<_> = results
        .iter()
        .filter_map(|result| {
            let info = result.info()?;
            let Some(device) = registry.get_device(&result.name) else {
                debug!(device = %result.name, "Skipping result for unregistered device");
                return None;
            };
            Some(UpdateEntry::new(device, info.clone()))
        })
        .filter(|entry| entry.has_update || entry.has_beta)
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

fn matches_stage(entry: &UpdateEntry, beta: bool) -> bool {
    if beta {
        entry.has_update || entry.has_beta
    } else {
        entry.has_update
    }
}

/// Entries eligible for `beta` (stable or beta) selection.
///
/// Beta selection also includes entries that only have a stable update.
pub fn filter_entries_by_stage(entries: &[UpdateEntry], beta: bool) -> Vec<UpdateEntry> {
    entries
        .iter()
        .filter(|entry| matches_stage(entry, beta))
        .cloned()
        .collect()
}

/// Positions of the entries [`filter_entries_by_stage`] would keep, in list
/// order, plus the resolved stage.
pub fn select_entries_by_stage(entries: &[UpdateEntry], beta: bool) -> (Vec<usize>, ReleaseStage) {
    let indices = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| matches_stage(entry, beta))
        .map(|(index, _)| index)
        .collect();

    (indices, ReleaseStage::from_beta(beta))
}

/// Project `entries` by position, skipping positions out of range.
pub fn get_entries_by_indices(entries: &[UpdateEntry], indices: &[usize]) -> Vec<UpdateEntry> {
    indices
        .iter()
        .filter_map(|&index| entries.get(index).cloned())
        .collect()
}

/// Number of devices a staged rollout of `percent` selects out of `eligible`.
///
/// `floor(eligible * percent / 100)`, but never zero when both inputs are
/// non-zero. Percentages above 100 count as 100.
pub fn staged_target_count(eligible: usize, percent: u32) -> usize {
    let percent = usize::try_from(percent.min(100)).unwrap_or(100);
    let target = eligible.saturating_mul(percent) / 100;

    if target == 0 && percent > 0 && eligible > 0 {
        1
    } else {
        target
    }
}

/// Scans devices and picks a staged subset of those with stable updates
#[derive(Clone)]
pub struct UpdateSelector {
    scanner: FleetScanner,
}

impl UpdateSelector {
    /// Create a selector over `scanner`
    pub fn new(scanner: FleetScanner) -> Self {
        Self { scanner }
    }

    /// Scan `devices` and return the staged subset with a stable update.
    ///
    /// Eligible devices are ordered by name before truncation, so the same fleet
    /// state always yields the same subset.
    pub async fn check_devices_for_updates(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
        staged_percent: u32,
    ) -> Vec<UpdateEntry> {
        let results = self.scanner.scan_devices(cancel, devices).await;
        let by_name: HashMap<&str, &DeviceDescriptor> =
            devices.iter().map(|d| (d.name.as_str(), d)).collect();

        let mut eligible: Vec<_> = results
            .into_iter()
            .filter_map(|result| {
                let info = result.result.ok().filter(|info| info.has_update)?;
                let device = by_name.get(result.name.as_str())?;
                Some(UpdateEntry::new((*device).clone(), info))
            })
            .collect();
        eligible.sort_by(|a, b| a.name.cmp(&b.name));

        let target = staged_target_count(eligible.len(), staged_percent);
        info!(
            eligible = eligible.len(),
            target,
            staged_percent,
            "Selected devices for staged rollout"
        );
        eligible.truncate(target);
        eligible
    }
}
