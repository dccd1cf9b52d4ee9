//! Self-preservation
//!
//! TigerStyle: Bounded window, explicit state machine, logged transitions.
//!
//! When most clients stop renewing at once, the likelier story is that the
//! registry lost the network, not that the fleet died. The controller compares
//! the renewals seen in the trailing minute with the renewals the registered
//! leases promise:
//!
//! ```text
//! expected = floor(leases × (60 / avg_duration_secs) × threshold)
//!
//!            actual < expected
//!   NORMAL ─────────────────────► PRESERVING
//!      ▲                              │
//!      └──────── actual >= expected ──┘
//! ```
//!
//! While PRESERVING the eviction sweep either evicts nothing (`Suppress`) or
//! only enough to stay above the threshold fraction (`Cap`).

use crate::store::InstanceStore;
use muster_core::constants::RENEWAL_WINDOW_SECS;
use muster_core::{PreservationConfig, PreservationMode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const WINDOW_BUCKETS_COUNT: usize = RENEWAL_WINDOW_SECS as usize;

/// Absorbs float error so 20 × 0.85 floors to 17, not 16
const EXPECTED_RATE_EPSILON: f64 = 1e-9;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Renewal Meter
// =============================================================================

const BUCKET_SECOND_SHIFT: u32 = 32;
const BUCKET_COUNT_MASK: u64 = (1 << BUCKET_SECOND_SHIFT) - 1;

fn pack(second: u64, count: u64) -> u64 {
    ((second & BUCKET_COUNT_MASK) << BUCKET_SECOND_SHIFT) | count.min(BUCKET_COUNT_MASK)
}

fn unpack(packed: u64) -> (u64, u64) {
    (packed >> BUCKET_SECOND_SHIFT, packed & BUCKET_COUNT_MASK)
}

/// Renewals observed over the trailing minute
///
/// One bucket per second in a ring. Each bucket packs `(second, count)` into a
/// single `AtomicU64` so renewals never take a lock; a slot is reset by the
/// first renewal of a newer second.
#[derive(Debug)]
pub struct RenewalMeter {
    buckets: [AtomicU64; WINDOW_BUCKETS_COUNT],
}

impl RenewalMeter {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Count one renewal at `now_ms`
    pub fn record(&self, now_ms: u64) {
        let second = (now_ms / 1000) & BUCKET_COUNT_MASK;
        let bucket = &self.buckets[(second % RENEWAL_WINDOW_SECS) as usize];
        // a renewal older than the slot's second has already left the window
        let _ = bucket.fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
            let (slot_second, count) = unpack(packed);
            match slot_second.cmp(&second) {
                std::cmp::Ordering::Equal => Some(pack(second, count + 1)),
                std::cmp::Ordering::Less => Some(pack(second, 1)),
                std::cmp::Ordering::Greater => None,
            }
        });
    }

    /// Renewals in the 60 seconds ending at `now_ms`
    pub fn count_last_minute(&self, now_ms: u64) -> u64 {
        let now_second = (now_ms / 1000) & BUCKET_COUNT_MASK;
        let oldest = now_second.saturating_sub(RENEWAL_WINDOW_SECS - 1);
        self.buckets
            .iter()
            .map(|b| unpack(b.load(Ordering::Acquire)))
            .filter(|&(second, count)| count > 0 && second >= oldest && second <= now_second)
            .map(|(_, count)| count)
            .sum()
    }
}

impl Default for RenewalMeter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Controller state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreservationState {
    /// Expired leases are evicted
    #[default]
    Normal,
    /// Eviction is suppressed or capped
    Preserving,
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalStats {
    pub state: PreservationState,
    pub enabled: bool,
    pub mode: PreservationMode,
    pub threshold: f64,
    pub leases_count: usize,
    pub expected_renewals_per_min: u64,
    pub actual_renewals_per_min: u64,
    pub evaluated_at_ms: u64,
}

/// Tracks renewal health and decides how much the sweep may evict
#[derive(Debug)]
pub struct PreservationController {
    config: PreservationConfig,
    store: Arc<InstanceStore>,
    meter: Arc<RenewalMeter>,
    last: Mutex<RenewalStats>,
}

impl PreservationController {
    pub fn new(
        config: PreservationConfig,
        store: Arc<InstanceStore>,
        meter: Arc<RenewalMeter>,
    ) -> Self {
        let initial = RenewalStats {
            state: PreservationState::Normal,
            enabled: config.enabled,
            mode: config.mode,
            threshold: config.threshold,
            leases_count: 0,
            expected_renewals_per_min: 0,
            actual_renewals_per_min: 0,
            evaluated_at_ms: 0,
        };
        Self {
            config,
            store,
            meter,
            last: Mutex::new(initial),
        }
    }

    pub fn config(&self) -> &PreservationConfig {
        &self.config
    }

    pub fn meter(&self) -> &Arc<RenewalMeter> {
        &self.meter
    }

    pub fn state(&self) -> PreservationState {
        lock(&self.last).state
    }

    /// Most recent evaluation
    pub fn last_stats(&self) -> RenewalStats {
        lock(&self.last).clone()
    }

    /// Renewals the registered leases promise per minute, scaled by threshold
    pub fn expected_renewals_per_min(&self) -> (usize, u64) {
        let summary = self.store.lease_summary();
        let expected = match summary.average_duration_secs() {
            Some(avg) if avg > 0.0 => {
                let per_min = summary.leases_count as f64 * (60.0 / avg);
                (per_min * self.config.threshold + EXPECTED_RATE_EPSILON).floor() as u64
            }
            _ => 0,
        };
        (summary.leases_count, expected)
    }

    /// Recompute expected vs. actual and transition if needed
    pub fn evaluate(&self, now_ms: u64) -> RenewalStats {
        let (leases_count, expected) = self.expected_renewals_per_min();
        let actual = self.meter.count_last_minute(now_ms);

        let engaged = self.config.enabled
            && leases_count >= self.config.min_leases_count
            && actual < expected;
        let next = if engaged {
            PreservationState::Preserving
        } else {
            PreservationState::Normal
        };

        let stats = RenewalStats {
            state: next,
            enabled: self.config.enabled,
            mode: self.config.mode,
            threshold: self.config.threshold,
            leases_count,
            expected_renewals_per_min: expected,
            actual_renewals_per_min: actual,
            evaluated_at_ms: now_ms,
        };

        let previous = std::mem::replace(&mut *lock(&self.last), stats.clone()).state;
        match (previous, next) {
            (PreservationState::Normal, PreservationState::Preserving) => warn!(
                expected,
                actual,
                leases = leases_count,
                mode = ?self.config.mode,
                "renewal rate below threshold, entering self-preservation"
            ),
            (PreservationState::Preserving, PreservationState::Normal) => info!(
                expected,
                actual,
                leases = leases_count,
                "renewal rate recovered, leaving self-preservation"
            ),
            _ => {}
        }

        stats
    }

    /// How many of `expired_count` leases the sweep may evict right now
    pub fn eviction_budget(&self, expired_count: usize, registered_count: usize) -> usize {
        debug_assert!(expired_count <= registered_count);

        match (self.state(), self.config.mode) {
            (PreservationState::Normal, _) => expired_count,
            (PreservationState::Preserving, PreservationMode::Suppress) => 0,
            (PreservationState::Preserving, PreservationMode::Cap) => {
                let floor = (registered_count as f64 * self.config.threshold).ceil() as usize;
                expired_count.min(registered_count.saturating_sub(floor))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::RegisterRequest;
    use crate::lease::Lease;
    use crate::store::InstanceRecord;
    use muster_core::NodeId;

    fn fill(store: &InstanceStore, count: usize, duration_secs: u64) {
        for i in 0..count {
            let (instance, _) = RegisterRequest::new("svc", format!("i-{}", i), "10.0.0.1", 80)
                .into_instance()
                .unwrap();
            store.put(InstanceRecord {
                instance,
                lease: Lease::new(0, duration_secs, duration_secs * 3),
                last_updated_ms: 0,
                origin_node: NodeId::new("node-a").unwrap(),
            });
        }
    }

    fn controller(store: Arc<InstanceStore>, config: PreservationConfig) -> PreservationController {
        PreservationController::new(config, store, Arc::new(RenewalMeter::new()))
    }

    #[test]
    fn test_meter_sliding_window() {
        let meter = RenewalMeter::new();
        meter.record(0);
        meter.record(500);
        meter.record(30_000);
        assert_eq!(meter.count_last_minute(30_000), 3);
        assert_eq!(meter.count_last_minute(59_999), 3);
        // second 0 falls out of the window at t=60s
        assert_eq!(meter.count_last_minute(60_000), 1);
        assert_eq!(meter.count_last_minute(120_000), 0);
    }

    #[test]
    fn test_meter_reuses_slots() {
        let meter = RenewalMeter::new();
        meter.record(1_000);
        meter.record(61_000);
        assert_eq!(meter.count_last_minute(61_000), 1);
    }

    #[test]
    fn test_meter_ignores_renewal_older_than_slot() {
        let meter = RenewalMeter::new();
        meter.record(61_000);
        // same slot, a minute earlier
        meter.record(1_000);
        assert_eq!(meter.count_last_minute(61_000), 1);
    }

    #[test]
    fn test_meter_concurrent_renewals() {
        let meter = RenewalMeter::new();
        std::thread::scope(|scope| {
            for worker in 0..8u64 {
                let meter = &meter;
                scope.spawn(move || {
                    for i in 0..500u64 {
                        meter.record(10_000 + worker * 1_000 + i % 1_000);
                    }
                });
            }
        });
        assert_eq!(meter.count_last_minute(20_000), 8 * 500);
    }

    #[test]
    fn test_expected_rate() {
        let store = Arc::new(InstanceStore::new());
        fill(&store, 10, 30);
        let ctl = controller(store, PreservationConfig::default());
        // 10 × 2/min × 0.85 = 17
        assert_eq!(ctl.expected_renewals_per_min(), (10, 17));
    }

    #[test]
    fn test_enters_and_leaves_preserving() {
        let store = Arc::new(InstanceStore::new());
        fill(&store, 10, 30);
        let ctl = controller(store, PreservationConfig::default());

        ctl.meter().record(10_000);
        ctl.meter().record(40_000);
        let stats = ctl.evaluate(60_000);
        assert_eq!(stats.state, PreservationState::Preserving);
        assert_eq!(stats.actual_renewals_per_min, 2);
        assert_eq!(ctl.eviction_budget(9, 10), 0);

        for i in 0..20 {
            ctl.meter().record(61_000 + i * 100);
        }
        assert_eq!(ctl.evaluate(70_000).state, PreservationState::Normal);
        assert_eq!(ctl.eviction_budget(9, 10), 9);
    }

    #[test]
    fn test_disabled_stays_normal() {
        let store = Arc::new(InstanceStore::new());
        fill(&store, 10, 30);
        let ctl = controller(store, PreservationConfig::disabled());
        assert_eq!(ctl.evaluate(60_000).state, PreservationState::Normal);
    }

    #[test]
    fn test_small_fleet_stays_normal() {
        let store = Arc::new(InstanceStore::new());
        fill(&store, 1, 30);
        let ctl = controller(store, PreservationConfig::default());
        let stats = ctl.evaluate(100_000);
        assert_eq!(stats.expected_renewals_per_min, 1);
        assert_eq!(stats.state, PreservationState::Normal);
    }

    #[test]
    fn test_cap_mode_budget() {
        let store = Arc::new(InstanceStore::new());
        fill(&store, 10, 30);
        let config = PreservationConfig {
            mode: PreservationMode::Cap,
            ..PreservationConfig::default()
        };
        let ctl = controller(store, config);
        assert_eq!(ctl.evaluate(60_000).state, PreservationState::Preserving);
        // 10 registered, ceil(8.5) = 9 must remain
        assert_eq!(ctl.eviction_budget(9, 10), 1);
        assert_eq!(ctl.eviction_budget(0, 10), 0);
    }
}
