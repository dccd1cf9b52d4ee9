//! Lease tracking
//!
//! TigerStyle: Explicit expiry arithmetic, one clock, no implicit resurrection.
//!
//! # Lease Semantics
//!
//! ```text
//! registered ──renew──► renewed ──renew──► renewed ...
//!      │                    │
//!      └──── now - last_renewed > eviction_timeout ────► expired
//! ```
//!
//! - `duration_secs` is the renewal interval the client promised.
//! - `eviction_timeout_secs` is the grace period; it always exceeds the duration.
//! - A renewal only moves `last_renewed_at_ms`. It never resizes the timeout.
//! - Renewing a key with no lease fails with `NotFound`: the client has to
//!   register again, it is never re-created implicitly.

use crate::error::RegistryResult;
use crate::instance::{InstanceKey, InstanceStatus, ServiceInstance};
use crate::preservation::RenewalMeter;
use crate::store::{InstanceRecord, InstanceStore, Slot};
use muster_core::constants::{
    LEASE_DURATION_SECS_MAX, LEASE_DURATION_SECS_MIN, LEASE_EVICTION_MULTIPLIER,
};
use muster_core::io::TimeProvider;
use muster_core::{LeaseConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Lease
// =============================================================================

/// Liveness contract for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// When the instance first registered (Unix timestamp ms)
    pub registered_at_ms: u64,
    /// Last successful registration or renewal (Unix timestamp ms)
    pub last_renewed_at_ms: u64,
    /// Promised renewal interval
    pub duration_secs: u64,
    /// Silence tolerated before expiry
    pub eviction_timeout_secs: u64,
    /// Renewals since registration
    pub renewal_count: u64,
}

impl Lease {
    /// Create a fresh lease starting at `now_ms`
    pub fn new(now_ms: u64, duration_secs: u64, eviction_timeout_secs: u64) -> Self {
        // TigerStyle: preconditions
        assert!(duration_secs > 0, "lease duration must be positive");
        assert!(
            eviction_timeout_secs > duration_secs,
            "eviction timeout {}s must exceed duration {}s",
            eviction_timeout_secs,
            duration_secs
        );

        Self {
            registered_at_ms: now_ms,
            last_renewed_at_ms: now_ms,
            duration_secs,
            eviction_timeout_secs,
            renewal_count: 0,
        }
    }

    /// Record a renewal; the clock never moves backwards
    pub fn renew(&mut self, now_ms: u64) {
        self.last_renewed_at_ms = self.last_renewed_at_ms.max(now_ms);
        self.renewal_count = self.renewal_count.saturating_add(1);

        debug_assert!(self.last_renewed_at_ms >= self.registered_at_ms);
    }

    /// `now - last_renewed > eviction_timeout`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_renewed_at_ms) > self.eviction_timeout_ms()
    }

    /// Instant after which the lease counts as expired
    pub fn expires_at_ms(&self) -> u64 {
        self.last_renewed_at_ms
            .saturating_add(self.eviction_timeout_ms())
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms().saturating_sub(now_ms)
    }

    pub fn eviction_timeout_ms(&self) -> u64 {
        self.eviction_timeout_secs.saturating_mul(1000)
    }

    /// Structural invariants a stored lease must satisfy
    pub fn is_consistent(&self) -> bool {
        self.duration_secs > 0
            && self.eviction_timeout_secs > self.duration_secs
            && self.last_renewed_at_ms >= self.registered_at_ms
    }
}

// =============================================================================
// Lease Policy
// =============================================================================

/// Turns a client's requested duration into concrete lease bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Duration assumed when the client states none
    pub default_duration_secs: u64,
    /// Configured grace period
    pub eviction_timeout_secs: u64,
}

impl LeasePolicy {
    pub fn from_config(config: &LeaseConfig) -> Self {
        debug_assert!(config.eviction_timeout_secs > config.renewal_interval_secs);
        Self {
            default_duration_secs: config.renewal_interval_secs,
            eviction_timeout_secs: config.eviction_timeout_secs,
        }
    }

    /// Resolve `(duration_secs, eviction_timeout_secs)` for a request
    ///
    /// The duration is clamped to the allowed range. A client promising a long
    /// interval gets a proportionally long timeout so it is not evicted
    /// between two on-time renewals.
    pub fn resolve(&self, requested_secs: Option<u64>) -> (u64, u64) {
        let duration = requested_secs
            .unwrap_or(self.default_duration_secs)
            .clamp(LEASE_DURATION_SECS_MIN, LEASE_DURATION_SECS_MAX);
        let timeout = self
            .eviction_timeout_secs
            .max(duration.saturating_mul(LEASE_EVICTION_MULTIPLIER));

        debug_assert!(timeout > duration);
        (duration, timeout)
    }

    /// Grant a new lease at `now_ms`
    pub fn grant(&self, requested_secs: Option<u64>, now_ms: u64) -> Lease {
        let (duration, timeout) = self.resolve(requested_secs);
        Lease::new(now_ms, duration, timeout)
    }
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self::from_config(&LeaseConfig::default())
    }
}

// =============================================================================
// Lease Manager
// =============================================================================

/// Outcome of a local registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub record: InstanceRecord,
    /// False when an existing registration was refreshed
    pub created: bool,
}

/// Outcome of a local renewal
#[derive(Debug, Clone)]
pub struct Renewal {
    pub record: InstanceRecord,
    /// Set when the renewal carried a different status
    pub status_changed: bool,
}

/// Creates, refreshes and renews leases inside the store
///
/// Every successful renewal is counted by the shared [`RenewalMeter`], which
/// is what self-preservation compares against the expected rate.
#[derive(Debug)]
pub struct LeaseManager {
    store: Arc<InstanceStore>,
    policy: LeasePolicy,
    meter: Arc<RenewalMeter>,
    time: Arc<dyn TimeProvider>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<InstanceStore>,
        policy: LeasePolicy,
        meter: Arc<RenewalMeter>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            policy,
            meter,
            time,
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Create or refresh the lease for `instance`
    ///
    /// Re-registration replaces the instance fields and restarts the renewal
    /// clock but keeps the original `registered_at_ms`.
    pub fn register(
        &self,
        instance: ServiceInstance,
        requested_secs: Option<u64>,
        origin: &NodeId,
        on_commit: impl FnOnce(&InstanceRecord),
    ) -> Registration {
        let now_ms = self.now_ms();
        let key = instance.key();

        self.store.with_slot(key, |slot| {
            let mut lease = self.policy.grant(requested_secs, now_ms);
            let (created, stamp_ms) = match slot.as_ref() {
                Some(Slot::Live(existing)) => {
                    lease.registered_at_ms = existing.lease.registered_at_ms.min(now_ms);
                    (false, now_ms.max(existing.last_updated_ms))
                }
                Some(tombstone) => (true, now_ms.max(tombstone.version_ms())),
                None => (true, now_ms),
            };

            let record = InstanceRecord {
                instance,
                lease,
                last_updated_ms: stamp_ms,
                origin_node: origin.clone(),
            };
            on_commit(&record);
            *slot = Some(Slot::Live(record.clone()));

            Registration { record, created }
        })
    }

    /// Renew the lease for `key`, optionally applying a reported status
    pub fn renew(
        &self,
        key: &InstanceKey,
        status: Option<InstanceStatus>,
        origin: &NodeId,
        on_commit: impl FnOnce(&InstanceRecord, bool),
    ) -> RegistryResult<Renewal> {
        let now_ms = self.now_ms();

        let renewal = self
            .store
            .update(key, |record| {
                record.lease.renew(now_ms);
                record.last_updated_ms = record.last_updated_ms.max(now_ms);
                record.origin_node = origin.clone();

                let status_changed = match status {
                    Some(s) if s != record.instance.status => {
                        record.instance.status = s;
                        true
                    }
                    _ => false,
                };
                on_commit(record, status_changed);

                Renewal {
                    record: record.clone(),
                    status_changed,
                }
            })
            .ok_or_else(|| key.not_found())?;

        self.meter.record(now_ms);
        Ok(renewal)
    }

    /// Whether `lease` is expired at `now_ms`
    ///
    /// The sweep passes one `now_ms` for the whole pass so the partition and
    /// the recheck under the key lock agree.
    pub fn is_expired(&self, lease: &Lease, now_ms: u64) -> bool {
        lease.is_expired(now_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::instance::RegisterRequest;
    use muster_core::ManualClock;

    fn node() -> NodeId {
        NodeId::new("node-a").unwrap()
    }

    fn instance(id: &str) -> ServiceInstance {
        RegisterRequest::new("billing", id, "10.0.0.1", 8080)
            .into_instance()
            .unwrap()
            .0
    }

    fn manager(clock: Arc<ManualClock>) -> (LeaseManager, Arc<InstanceStore>, Arc<RenewalMeter>) {
        let store = Arc::new(InstanceStore::new());
        let meter = Arc::new(RenewalMeter::new());
        let mgr = LeaseManager::new(store.clone(), LeasePolicy::default(), meter.clone(), clock);
        (mgr, store, meter)
    }

    #[test]
    fn test_lease_expiry_boundary() {
        let lease = Lease::new(0, 30, 90);
        assert!(!lease.is_expired(90_000));
        assert!(lease.is_expired(90_001));
        assert_eq!(lease.expires_at_ms(), 90_000);
        assert_eq!(lease.remaining_ms(60_000), 30_000);
        assert_eq!(lease.remaining_ms(100_000), 0);
    }

    #[test]
    fn test_lease_renew_moves_clock_only_forward() {
        let mut lease = Lease::new(10_000, 30, 90);
        lease.renew(40_000);
        assert_eq!(lease.last_renewed_at_ms, 40_000);
        lease.renew(20_000);
        assert_eq!(lease.last_renewed_at_ms, 40_000);
        assert_eq!(lease.renewal_count, 2);
        assert_eq!(lease.eviction_timeout_secs, 90);
    }

    #[test]
    #[should_panic(expected = "must exceed duration")]
    fn test_lease_rejects_timeout_below_duration() {
        let _ = Lease::new(0, 30, 30);
    }

    #[test]
    fn test_policy_resolve() {
        let policy = LeasePolicy::default();
        assert_eq!(policy.resolve(None), (30, 90));
        assert_eq!(policy.resolve(Some(10)), (10, 90));
        // long promise stretches the timeout
        assert_eq!(policy.resolve(Some(60)), (60, 180));
        // clamped into range
        assert_eq!(policy.resolve(Some(10 * LEASE_DURATION_SECS_MAX)).0, LEASE_DURATION_SECS_MAX);
    }

    #[test]
    fn test_register_then_refresh_keeps_registered_at() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (mgr, store, _) = manager(clock.clone());

        let first = mgr.register(instance("b-1"), None, &node(), |_| {});
        assert!(first.created);

        clock.advance_secs(20);
        let mut changed = instance("b-1");
        changed.port = 9090;
        let second = mgr.register(changed, None, &node(), |_| {});
        assert!(!second.created);
        assert_eq!(second.record.lease.registered_at_ms, 1_000);
        assert_eq!(second.record.lease.last_renewed_at_ms, 21_000);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&second.record.key()).unwrap().instance.port, 9090);
    }

    #[test]
    fn test_renew_updates_clock_and_counts() {
        let clock = Arc::new(ManualClock::new(0));
        let (mgr, _, meter) = manager(clock.clone());
        let key = mgr.register(instance("b-1"), None, &node(), |_| {}).record.key();

        clock.advance_secs(30);
        let renewal = mgr.renew(&key, None, &node(), |_, _| {}).unwrap();
        assert_eq!(renewal.record.lease.last_renewed_at_ms, 30_000);
        assert!(!renewal.status_changed);
        assert_eq!(meter.count_last_minute(30_000), 1);

        let renewal = mgr
            .renew(&key, Some(InstanceStatus::Down), &node(), |_, _| {})
            .unwrap();
        assert!(renewal.status_changed);
        assert_eq!(renewal.record.instance.status, InstanceStatus::Down);
    }

    #[test]
    fn test_renew_missing_is_not_found() {
        let clock = Arc::new(ManualClock::new(0));
        let (mgr, store, meter) = manager(clock);
        let key = InstanceKey::parse("billing", "ghost").unwrap();

        let err = mgr.renew(&key, None, &node(), |_, _| {}).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
        // no implicit resurrection
        assert!(store.is_empty());
        assert_eq!(meter.count_last_minute(0), 0);
    }

    #[test]
    fn test_is_expired_uses_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let (mgr, _, _) = manager(clock.clone());
        let record = mgr.register(instance("b-1"), None, &node(), |_| {}).record;

        clock.advance_secs(90);
        assert!(!mgr.is_expired(&record.lease, mgr.now_ms()));
        clock.advance_ms(1);
        assert!(mgr.is_expired(&record.lease, mgr.now_ms()));
    }
}
