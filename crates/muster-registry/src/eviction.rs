//! Eviction sweep
//!
//! TigerStyle: Snapshot, decide outside any lock, remove one key at a time.
//!
//! Each sweep:
//! 1. snapshots every record,
//! 2. partitions expired from live without holding a lock,
//! 3. asks self-preservation how many expired leases may go,
//! 4. removes those, oldest expiry first, re-checking expiry under the key
//!    lock so a renewal racing the sweep wins,
//! 5. purges records that fail their consistency check,
//! 6. forgets tombstones older than the configured TTL.

use crate::feed::Change;
use crate::instance::InstanceKey;
use crate::preservation::PreservationState;
use crate::registry::Registry;
use crate::replication::ReplicationAction;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub registered_count: usize,
    pub expired_count: usize,
    pub evicted: Vec<InstanceKey>,
    /// Expired leases kept because self-preservation withheld the budget
    pub suppressed_count: usize,
    pub healed: Vec<InstanceKey>,
    pub tombstones_pruned: usize,
    pub state: PreservationState,
}

impl EvictionReport {
    /// True when the sweep changed nothing
    pub fn is_idle(&self) -> bool {
        self.evicted.is_empty() && self.healed.is_empty() && self.suppressed_count == 0
    }
}

impl Registry {
    /// Run one eviction sweep now
    pub fn evict_expired(&self) -> EvictionReport {
        let now_ms = self.now_ms();
        let snapshot = self.store.records();
        let registered_count = snapshot.len();

        let mut expired: Vec<_> = snapshot
            .into_iter()
            .filter(|(_, record)| self.leases.is_expired(&record.lease, now_ms))
            .map(|(key, record)| (key, record.lease.expires_at_ms()))
            .collect();
        let expired_count = expired.len();

        let state = self.preservation.state();
        let budget = self
            .preservation
            .eviction_budget(expired_count, registered_count);
        expired.sort_by_key(|(_, expires_at_ms)| *expires_at_ms);

        let mut evicted = Vec::with_capacity(budget);
        for (key, _) in expired.into_iter().take(budget) {
            let (removed, stamp_ms) = self.remove_key(&key, now_ms, |record| {
                self.leases.is_expired(&record.lease, now_ms)
            });
            let Some(record) = removed else {
                debug!(key = %key, "lease renewed during sweep, skipping");
                continue;
            };

            info!(
                key = %key,
                last_renewed_at_ms = record.lease.last_renewed_at_ms,
                eviction_timeout_secs = record.lease.eviction_timeout_secs,
                "instance evicted"
            );
            self.publish(stamp_ms, ReplicationAction::Evict { key: key.clone() });
            evicted.push(key);
        }

        let suppressed_count = expired_count.saturating_sub(budget);
        if suppressed_count > 0 {
            warn!(
                expired = expired_count,
                suppressed = suppressed_count,
                registered = registered_count,
                "self-preservation withheld eviction"
            );
        }

        let mut healed = Vec::new();
        for (key, reason) in self.store.inconsistent_keys() {
            error!(key = %key, reason = %reason, "inconsistent record, purging");
            if self.store.purge(&key) {
                self.feed.record(Change::Delete { key: key.clone() });
                healed.push(key);
            }
        }

        let ttl_ms = self.config.lease.tombstone_ttl_secs.saturating_mul(1000);
        let tombstones_pruned = self.store.prune_tombstones(now_ms.saturating_sub(ttl_ms));

        let report = EvictionReport {
            registered_count,
            expired_count,
            evicted,
            suppressed_count,
            healed,
            tombstones_pruned,
            state,
        };

        debug!(
            registered = report.registered_count,
            expired = report.expired_count,
            evicted = report.evicted.len(),
            healed = report.healed.len(),
            tombstones_pruned = report.tombstones_pruned,
            "eviction sweep complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedResponse;
    use crate::instance::RegisterRequest;
    use muster_core::{ManualClock, MusterConfig, NodeId, PreservationMode};
    use std::sync::Arc;

    fn registry_with(config: MusterConfig) -> (Registry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry =
            Registry::with_clock(config, NodeId::new("node-a").unwrap(), clock.clone());
        (registry, clock)
    }

    fn register_fleet(registry: &Registry, count: usize) {
        for i in 0..count {
            registry
                .register(RegisterRequest::new("orders", format!("o-{}", i), "10.0.0.1", 8080))
                .unwrap();
        }
    }

    #[test]
    fn test_silent_instance_is_evicted() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 1);

        clock.advance_secs(89);
        registry.evaluate_preservation();
        assert!(registry.evict_expired().evicted.is_empty());

        clock.advance_secs(11);
        registry.evaluate_preservation();
        let report = registry.evict_expired();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.state, PreservationState::Normal);
        assert!(registry.query("orders").unwrap().is_empty());
        assert!(registry.renew("orders", "o-0", None).is_err());
    }

    #[test]
    fn test_renewed_instance_survives() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 1);

        for _ in 0..5 {
            clock.advance_secs(30);
            registry.renew("orders", "o-0", None).unwrap();
            assert!(registry.evict_expired().evicted.is_empty());
        }
        assert_eq!(registry.query("orders").unwrap().len(), 1);
    }

    #[test]
    fn test_mass_silence_engages_preservation() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 10);

        for _ in 0..3 {
            clock.advance_secs(30);
            registry.renew("orders", "o-0", None).unwrap();
        }
        clock.advance_secs(10);

        let stats = registry.evaluate_preservation();
        assert_eq!(stats.state, PreservationState::Preserving);
        assert_eq!(stats.expected_renewals_per_min, 17);
        assert_eq!(stats.actual_renewals_per_min, 2);

        let report = registry.evict_expired();
        assert_eq!(report.expired_count, 9);
        assert!(report.evicted.is_empty());
        assert_eq!(report.suppressed_count, 9);
        assert_eq!(registry.query("orders").unwrap().len(), 10);
    }

    #[test]
    fn test_cap_mode_evicts_down_to_floor() {
        let mut config = MusterConfig::default();
        config.preservation.mode = PreservationMode::Cap;
        let (registry, clock) = registry_with(config);
        register_fleet(&registry, 10);

        for _ in 0..3 {
            clock.advance_secs(30);
            registry.renew("orders", "o-0", None).unwrap();
        }
        clock.advance_secs(10);
        registry.evaluate_preservation();

        let report = registry.evict_expired();
        // ceil(10 * 0.85) = 9 instances must remain
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.suppressed_count, 8);
        assert_eq!(registry.query("orders").unwrap().len(), 9);
    }

    #[test]
    fn test_disabled_preservation_evicts_everything() {
        let mut config = MusterConfig::default();
        config.preservation.enabled = false;
        let (registry, clock) = registry_with(config);
        register_fleet(&registry, 10);

        clock.advance_secs(100);
        let stats = registry.evaluate_preservation();
        assert_eq!(stats.state, PreservationState::Normal);

        let report = registry.evict_expired();
        assert_eq!(report.evicted.len(), 10);
        assert!(registry.store().is_empty());
    }

    #[test]
    fn test_healthy_fleet_stays_normal() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 10);

        for _ in 0..2 {
            clock.advance_secs(30);
            for i in 0..10 {
                registry
                    .renew("orders", &format!("o-{}", i), None)
                    .unwrap();
            }
        }

        let stats = registry.evaluate_preservation();
        assert_eq!(stats.actual_renewals_per_min, 20);
        assert_eq!(stats.state, PreservationState::Normal);
    }

    #[test]
    fn test_eviction_is_recorded_in_feed() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 1);
        let before = registry.query_all(None).version();

        clock.advance_secs(100);
        registry.evict_expired();

        match registry.query_all(Some(before)) {
            FeedResponse::Delta { changes, .. } => {
                assert_eq!(changes.len(), 1);
                assert!(matches!(changes[0].change, Change::Delete { .. }));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_record_is_healed() {
        let (registry, _) = registry_with(MusterConfig::default());
        register_fleet(&registry, 1);

        let record = registry.get_instance("orders", "o-0").unwrap();
        let wrong_key = InstanceKey::parse("orders", "o-7").unwrap();
        registry.store().insert_raw(wrong_key.clone(), record);

        let report = registry.evict_expired();
        assert_eq!(report.healed, vec![wrong_key.clone()]);
        assert!(!registry.store().contains(&wrong_key));
        assert!(registry.get_instance("orders", "o-0").is_ok());
    }

    #[test]
    fn test_tombstones_pruned_after_ttl() {
        let (registry, clock) = registry_with(MusterConfig::default());
        register_fleet(&registry, 1);
        registry.cancel("orders", "o-0").unwrap();
        let key = InstanceKey::parse("orders", "o-0").unwrap();
        assert!(registry.store().tombstone(&key).is_some());

        clock.advance_secs(60);
        assert_eq!(registry.evict_expired().tombstones_pruned, 0);

        clock.advance_secs(300);
        assert_eq!(registry.evict_expired().tombstones_pruned, 1);
        assert!(registry.store().tombstone(&key).is_none());
    }
}
