//! Unit tests for the public fleet-firmware API

mod cache_tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use fleet_firmware::prelude::*;
    use fleet_test_helpers::prelude::*;
    use std::time::Duration;

    fn entry(name: &str, available: &str, checked_secs_ago: i64) -> CacheEntry {
        CacheEntry {
            device_name: name.to_string(),
            address: format!("{name}.local"),
            info: Some(firmware_info("1.0.0", available, "")),
            last_checked: Utc::now() - ChronoDuration::seconds(checked_secs_ago),
            error: None,
        }
    }

    #[test]
    fn test_all_sorted_example() {
        let cache = FirmwareCache::new();
        cache.set("zebra", entry("zebra", "", 0));
        cache.set("alpha", entry("alpha", "1.1.0", 0));
        cache.set("beta", entry("beta", "", 0));
        cache.set("gamma", entry("gamma", "1.1.0", 0));

        let names: Vec<_> = cache
            .all_sorted()
            .into_iter()
            .map(|e| e.device_name)
            .collect();
        assert_eq!(names, vec!["alpha", "gamma", "beta", "zebra"]);
        assert_eq!(cache.update_count(), 2);
        assert_eq!(cache.devices_with_updates().len(), 2);
    }

    #[test]
    fn test_is_stale_uses_max_age() {
        let fresh = entry("a", "", 10);
        let old = entry("b", "", 7200);

        assert!(!FirmwareCache::is_stale(&fresh, Duration::from_secs(3600)));
        assert!(FirmwareCache::is_stale(&old, Duration::from_secs(3600)));
    }

    #[test]
    fn test_get_does_not_refresh_and_clear_empties() {
        let cache = FirmwareCache::new();
        cache.set("a", entry("a", "1.1.0", 7200));

        let got = must_some(cache.get("a"), "entry a");
        assert!(FirmwareCache::is_stale(&got, Duration::from_secs(60)));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_record_keeps_info_on_failure() {
        let cache = FirmwareCache::new();
        let device = DeviceDescriptor::native("porch", "10.0.0.5");

        cache.record(&device, &check_ok("porch", "1.1.0", ""));
        cache.record(
            &device,
            &CheckResult::failed("porch", FirmwareError::connection("porch", "timeout")),
        );

        let entry = must_some(cache.get("porch"), "porch entry");
        assert!(entry.has_update());
        assert!(entry.error.is_some());
    }
}

mod selection_tests {
    use fleet_firmware::prelude::*;
    use fleet_firmware::{
        build_update_list, filter_entries_by_stage, get_entries_by_indices, staged_target_count,
    };
    use fleet_test_helpers::prelude::*;

    #[test]
    fn test_build_update_list_example() {
        let devices = [
            DeviceDescriptor::native("device1", "10.0.0.1"),
            DeviceDescriptor::native("device2", "10.0.0.2"),
            DeviceDescriptor::native("device3", "10.0.0.3"),
        ];
        let results = vec![
            check_ok("device2", "", ""),
            check_ok("device3", "1.1.0", "1.2.0-beta1"),
            check_ok("device1", "1.1.0", ""),
        ];

        let entries = build_update_list(&results, &registry(&devices));
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["device1", "device3"]);
        assert!(entries.iter().any(|e| e.has_beta));
    }

    #[test]
    fn test_stage_filter_example() {
        let entries = vec![
            update_entry("a", true, false),
            update_entry("b", true, true),
            update_entry("c", false, true),
            update_entry("d", false, false),
        ];
        assert_eq!(filter_entries_by_stage(&entries, false).len(), 2);
        assert_eq!(filter_entries_by_stage(&entries, true).len(), 3);
    }

    #[test]
    fn test_indices_example() {
        let entries: Vec<_> = ["e0", "e1", "e2", "e3"]
            .into_iter()
            .map(|n| update_entry(n, true, false))
            .collect();
        let picked = get_entries_by_indices(&entries, &[0, 10]);
        assert_eq!(picked.len(), 1);
        assert_eq!(must_some(picked.first(), "e0").name, "e0");
    }

    #[test]
    fn test_staged_rollout_examples() {
        assert_eq!(staged_target_count(7, 0), 0);
        assert_eq!(staged_target_count(7, 1), 1);
        assert_eq!(staged_target_count(7, 50), 3);
        assert_eq!(staged_target_count(7, 100), 7);
    }
}

mod config_tests {
    use fleet_firmware::prelude::*;
    use fleet_test_helpers::prelude::*;

    #[test]
    fn test_yaml_config() {
        let config = must(FleetConfig::from_yaml_str(
            "max_concurrency: 8\ndefault_parallelism: 3\nstatus_poll:\n  interval_ms: 1000\n  timeout_secs: 120\n",
        ));
        must(config.validate());
        assert_eq!(config.concurrency_limit().get(), 8);
        assert_eq!(config.default_parallelism, 3);
        assert!(config.status_poll.is_some());
    }

    #[test]
    fn test_bad_schema_version_rejected() {
        let config = must(FleetConfig::from_yaml_str("schema_version: other/2\n"));
        assert!(config.validate().is_err());
    }
}
