//! In-memory cache of last-known firmware info per device
//!
//! Entries never expire on their own; staleness is evaluated against the
//! current time when read. A single reader/writer lock guards the map.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::device::DeviceDescriptor;
use crate::error::FirmwareError;
use crate::model::{CheckResult, FirmwareInfo};

/// Cached firmware state for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Device name, the cache key
    pub device_name: String,

    /// Device address at the time of the check
    pub address: String,

    /// Last successful check, possibly older than `last_checked`
    pub info: Option<FirmwareInfo>,

    /// When the device was last checked
    pub last_checked: DateTime<Utc>,

    /// Cause of the most recent failed check
    pub error: Option<FirmwareError>,
}

impl CacheEntry {
    /// Whether the last known info offers a stable update.
    pub fn has_update(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.has_update)
    }

    /// `now - last_checked > max_age`. An entry exactly `max_age` old is fresh.
    pub fn is_stale_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        now.signed_duration_since(self.last_checked) > max_age
    }
}

/// Concurrency-safe firmware cache keyed by device name
#[derive(Debug, Default)]
pub struct FirmwareCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FirmwareCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry. Never triggers a refresh.
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Insert or overwrite an entry
    pub fn set(&self, name: impl Into<String>, entry: CacheEntry) {
        self.entries.write().insert(name.into(), entry);
    }

    /// Record a check result for `device`.
    ///
    /// A failure keeps previously cached info and only replaces the error and
    /// timestamp; a success replaces the info and clears the error.
    pub fn record(&self, device: &DeviceDescriptor, result: &CheckResult) -> CacheEntry {
        self.record_at(device, result, Utc::now())
    }

    pub(crate) fn record_at(
        &self,
        device: &DeviceDescriptor,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let mut entries = self.entries.write();
        let previous_info = entries.get(&result.name).and_then(|e| e.info.clone());

        let entry = match &result.result {
            Ok(info) => CacheEntry {
                device_name: result.name.clone(),
                address: device.address.clone(),
                info: Some(info.clone()),
                last_checked: now,
                error: None,
            },
            Err(error) => CacheEntry {
                device_name: result.name.clone(),
                address: device.address.clone(),
                info: previous_info,
                last_checked: now,
                error: Some(error.clone()),
            },
        };

        entries.insert(result.name.clone(), entry.clone());
        debug!(device = %result.name, ok = result.result.is_ok(), "Recorded firmware check");
        entry
    }

    /// Unordered snapshot of every entry
    pub fn all(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Entries with updates first, then alphabetical by device name within each group
    pub fn all_sorted(&self) -> Vec<CacheEntry> {
        let mut entries = self.all();
        entries.sort_by(|a, b| {
            b.has_update()
                .cmp(&a.has_update())
                .then_with(|| a.device_name.cmp(&b.device_name))
        });
        entries
    }

    /// Entries whose last known info offers an update
    pub fn devices_with_updates(&self) -> Vec<CacheEntry> {
        self.all().into_iter().filter(CacheEntry::has_update).collect()
    }

    /// Number of entries whose last known info offers an update
    pub fn update_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.has_update())
            .count()
    }

    /// Number of cached devices
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Replace the whole contents, keyed by each entry's device name
    pub fn replace_all(&self, entries: impl IntoIterator<Item = CacheEntry>) {
        let map = entries
            .into_iter()
            .map(|e| (e.device_name.clone(), e))
            .collect();
        *self.entries.write() = map;
    }

    /// Whether `entry` is older than `max_age` right now
    pub fn is_stale(entry: &CacheEntry, max_age: Duration) -> bool {
        entry.is_stale_at(max_age, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, has_update: bool) -> CacheEntry {
        CacheEntry {
            device_name: name.to_string(),
            address: format!("{name}.local"),
            info: Some(FirmwareInfo {
                current: "1.0.0".to_string(),
                has_update,
                ..Default::default()
            }),
            last_checked: Utc::now(),
            error: None,
        }
    }

    fn names(entries: &[CacheEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.device_name.as_str()).collect()
    }

    #[test]
    fn test_is_stale_boundary_is_strict() -> Result<(), String> {
        let checked =
            DateTime::<Utc>::from_timestamp(1_767_268_800, 0).ok_or("invalid timestamp")?;
        let mut e = entry("a", false);
        e.last_checked = checked;
        let max_age = Duration::from_secs(3600);

        let exactly = checked + chrono::Duration::seconds(3600);
        assert!(!e.is_stale_at(max_age, exactly));

        let just_over = exactly + chrono::Duration::milliseconds(1);
        assert!(e.is_stale_at(max_age, just_over));
        Ok(())
    }

    #[test]
    fn test_is_stale_with_recent_entry() {
        let e = entry("a", false);
        assert!(!FirmwareCache::is_stale(&e, Duration::from_secs(60)));
    }

    #[test]
    fn test_all_sorted_updates_first_then_name() {
        let cache = FirmwareCache::new();
        for (name, update) in [
            ("zebra", false),
            ("alpha", true),
            ("beta", false),
            ("gamma", true),
        ] {
            cache.set(name, entry(name, update));
        }

        let sorted = cache.all_sorted();
        assert_eq!(names(&sorted), vec!["alpha", "gamma", "beta", "zebra"]);
    }

    #[test]
    fn test_missing_info_counts_as_no_update() {
        let cache = FirmwareCache::new();
        let mut broken = entry("broken", true);
        broken.info = None;
        cache.set("broken", broken);
        cache.set("ok", entry("ok", true));

        assert_eq!(cache.update_count(), 1);
        assert_eq!(names(&cache.devices_with_updates()), vec!["ok"]);
        assert_eq!(names(&cache.all_sorted()), vec!["ok", "broken"]);
    }

    #[test]
    fn test_set_overwrites_and_clear_empties() {
        let cache = FirmwareCache::new();
        cache.set("a", entry("a", false));
        cache.set("a", entry("a", true));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_some_and(|e| e.has_update()));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_failed_refresh_keeps_previous_info() {
        let cache = FirmwareCache::new();
        let device = DeviceDescriptor::native("lamp", "10.0.0.4");
        let info = FirmwareInfo {
            current: "1.0.0".to_string(),
            available: "1.1.0".to_string(),
            has_update: true,
            ..Default::default()
        };

        cache.record(&device, &CheckResult::ok("lamp", info.clone()));
        let failure = FirmwareError::connection("lamp", "host unreachable");
        let entry = cache.record(&device, &CheckResult::failed("lamp", failure.clone()));

        assert_eq!(entry.info, Some(info));
        assert_eq!(entry.error, Some(failure));

        let refreshed = cache.record(
            &device,
            &CheckResult::ok("lamp", FirmwareInfo::default()),
        );
        assert!(refreshed.error.is_none());
        assert!(!refreshed.has_update());
    }

    #[test]
    fn test_failed_first_check_has_no_info() {
        let cache = FirmwareCache::new();
        let device = DeviceDescriptor::native("new", "10.0.0.5");
        let entry = cache.record(
            &device,
            &CheckResult::failed("new", FirmwareError::connection("new", "refused")),
        );
        assert!(entry.info.is_none());
        assert_eq!(entry.address, "10.0.0.5");
    }
}
