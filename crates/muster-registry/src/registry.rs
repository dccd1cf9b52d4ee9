//! Registry API
//!
//! TigerStyle: One mutation path for local and replicated writes.
//!
//! [`Registry`] is the single handle every caller shares: HTTP handlers, the
//! eviction and self-preservation tasks, and the replication receiver. Local
//! mutations commit to the store, append to the client feed under the same
//! key lock, and are then handed to the replication sink. Replicated events
//! go through [`Registry::apply_replicated`], which applies last-write-wins
//! per key and never republishes.

use crate::error::{RegistryError, RegistryResult};
use crate::feed::{Change, ClientFeed, FeedResponse};
use crate::instance::{InstanceKey, InstanceStatus, RegisterRequest, ServiceInstance, ServiceName};
use crate::lease::{Lease, LeaseManager, LeasePolicy};
use crate::preservation::{PreservationController, RenewalMeter, RenewalStats};
use crate::replication::{ApplyOutcome, ReplicationAction, ReplicationEvent, ReplicationSink};
use crate::store::{InstanceRecord, InstanceStore, Slot};
use muster_core::io::{TimeProvider, WallClockTime};
use muster_core::{MusterConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Point-in-time registry figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub node_id: NodeId,
    pub instances_count: usize,
    pub services_count: usize,
    pub feed_version: u64,
    pub replication_enabled: bool,
    pub preservation: RenewalStats,
}

/// The service registry
#[derive(Debug)]
pub struct Registry {
    pub(crate) node_id: NodeId,
    pub(crate) config: MusterConfig,
    pub(crate) time: Arc<dyn TimeProvider>,
    pub(crate) store: Arc<InstanceStore>,
    pub(crate) leases: LeaseManager,
    pub(crate) preservation: PreservationController,
    pub(crate) feed: ClientFeed,
    sink: Option<Arc<dyn ReplicationSink>>,
}

impl Registry {
    /// Create a standalone registry on the wall clock
    pub fn new(config: MusterConfig, node_id: NodeId) -> Self {
        Self::with_providers(config, node_id, Arc::new(WallClockTime::new()), None)
    }

    /// Create a standalone registry with a custom clock (for tests)
    pub fn with_clock(config: MusterConfig, node_id: NodeId, time: Arc<dyn TimeProvider>) -> Self {
        Self::with_providers(config, node_id, time, None)
    }

    /// Create with every collaborator injected
    pub fn with_providers(
        config: MusterConfig,
        node_id: NodeId,
        time: Arc<dyn TimeProvider>,
        sink: Option<Arc<dyn ReplicationSink>>,
    ) -> Self {
        let store = Arc::new(InstanceStore::new());
        let meter = Arc::new(RenewalMeter::new());
        let leases = LeaseManager::new(
            store.clone(),
            LeasePolicy::from_config(&config.lease),
            meter.clone(),
            time.clone(),
        );
        let preservation =
            PreservationController::new(config.preservation.clone(), store.clone(), meter);
        let feed = ClientFeed::new(config.feed.changelog_entries_count_max);

        Self {
            node_id,
            config,
            time,
            store,
            leases,
            preservation,
            feed,
            sink,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &MusterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.time
    }

    pub fn preservation(&self) -> &PreservationController {
        &self.preservation
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    // =========================================================================
    // Client Operations
    // =========================================================================

    /// Register or refresh an instance
    pub fn register(&self, request: RegisterRequest) -> RegistryResult<InstanceRecord> {
        let (instance, requested_secs) = request.into_instance()?;

        let registration = self
            .leases
            .register(instance, requested_secs, &self.node_id, |record| {
                self.feed.record(Change::Upsert {
                    instance: record.instance.clone(),
                });
            });
        let record = registration.record;

        info!(
            service = %record.instance.service_name,
            instance_id = %record.instance.instance_id,
            address = %record.instance.address,
            port = record.instance.port,
            created = registration.created,
            "instance registered"
        );

        self.publish(
            record.last_updated_ms,
            ReplicationAction::Register {
                instance: record.instance.clone(),
                duration_secs: record.lease.duration_secs,
            },
        );
        Ok(record)
    }

    /// Renew a lease; `NotFound` tells the client to register again
    pub fn renew(
        &self,
        service: &str,
        instance_id: &str,
        status: Option<InstanceStatus>,
    ) -> RegistryResult<Lease> {
        let key = InstanceKey::parse(service, instance_id)?;

        let renewal = self
            .leases
            .renew(&key, status, &self.node_id, |record, status_changed| {
                if status_changed {
                    self.feed.record(Change::Upsert {
                        instance: record.instance.clone(),
                    });
                }
            })
            .map_err(|e| {
                debug!(key = %key, "renewal for unknown instance");
                e
            })?;

        debug!(key = %key, renewals = renewal.record.lease.renewal_count, "lease renewed");

        self.publish(
            renewal.record.last_updated_ms,
            ReplicationAction::Renew { key, status },
        );
        Ok(renewal.record.lease)
    }

    /// Remove an instance; succeeds whether or not it was registered
    ///
    /// Returns true if an instance was removed.
    pub fn cancel(&self, service: &str, instance_id: &str) -> RegistryResult<bool> {
        let key = InstanceKey::parse(service, instance_id)?;
        let now_ms = self.now_ms();

        let (removed, stamp_ms) = self.remove_key(&key, now_ms, |_| true);
        if removed.is_some() {
            info!(key = %key, "instance cancelled");
        } else {
            debug!(key = %key, "cancel for unknown instance");
        }

        self.publish(stamp_ms, ReplicationAction::Cancel { key });
        Ok(removed.is_some())
    }

    /// Override an instance's status without touching its lease clock
    pub fn update_status(
        &self,
        service: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> RegistryResult<InstanceRecord> {
        let key = InstanceKey::parse(service, instance_id)?;
        let now_ms = self.now_ms();

        let record = self
            .store
            .update(&key, |record| {
                let changed = record.instance.status != status;
                record.instance.status = status;
                record.last_updated_ms = record.last_updated_ms.max(now_ms);
                record.origin_node = self.node_id.clone();
                if changed {
                    self.feed.record(Change::Upsert {
                        instance: record.instance.clone(),
                    });
                }
                record.clone()
            })
            .ok_or_else(|| key.not_found())?;

        info!(key = %key, status = %status, "instance status updated");

        self.publish(
            record.last_updated_ms,
            ReplicationAction::StatusUpdate { key, status },
        );
        Ok(record)
    }

    /// Instances of one service; empty for an unknown service
    pub fn query(&self, service: &str) -> RegistryResult<Vec<ServiceInstance>> {
        let name = ServiceName::new(service)?;
        Ok(self.store.list_service(&name))
    }

    /// One instance with its lease
    pub fn get_instance(&self, service: &str, instance_id: &str) -> RegistryResult<InstanceRecord> {
        let key = InstanceKey::parse(service, instance_id)?;
        let record = self.store.get(&key).ok_or_else(|| key.not_found())?;
        if let Some(reason) = record.inconsistency(&key) {
            return Err(RegistryError::inconsistency(key.to_string(), reason));
        }
        Ok(record)
    }

    /// Full snapshot, or the delta since `since_version` when still retained
    pub fn query_all(&self, since_version: Option<u64>) -> FeedResponse {
        self.feed.query(since_version, &self.store)
    }

    /// Recompute self-preservation state now
    pub fn evaluate_preservation(&self) -> RenewalStats {
        self.preservation.evaluate(self.now_ms())
    }

    pub fn stats(&self) -> RegistryStats {
        let services = self.store.list_all();
        RegistryStats {
            node_id: self.node_id.clone(),
            instances_count: services.values().map(Vec::len).sum(),
            services_count: services.len(),
            feed_version: self.feed.version(),
            replication_enabled: self.sink.is_some(),
            preservation: self.preservation.last_stats(),
        }
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Apply a mutation received from a peer
    ///
    /// Instance data follows last-write-wins by `timestamp_ms`. The lease
    /// clock is different: a replicated renewal always extends liveness,
    /// because a renewal that lost a data race still proves the client is up.
    pub fn apply_replicated(&self, event: ReplicationEvent) -> ApplyOutcome {
        if event.origin_node == self.node_id {
            debug!(key = %event.key(), "ignoring own replicated event");
            return ApplyOutcome::Stale;
        }

        let now_ms = self.now_ms();
        let ts = event.timestamp_ms;
        let origin = event.origin_node;
        let kind = event.action.name();
        let key = event.action.key();

        if let ReplicationAction::Register { instance, .. } = &event.action {
            if let Err(e) = instance.validate() {
                warn!(key = %key, origin = %origin, error = %e, "rejecting invalid replicated instance");
                return ApplyOutcome::Rejected;
            }
        }

        let outcome = match event.action {
            ReplicationAction::Register {
                instance,
                duration_secs,
            } => self.store.with_slot(key.clone(), |slot| {
                if slot.as_ref().is_some_and(|s| ts < s.version_ms()) {
                    return ApplyOutcome::Stale;
                }
                let mut lease = self.leases.policy().grant(Some(duration_secs), now_ms);
                if let Some(Slot::Live(existing)) = slot.as_ref() {
                    lease.registered_at_ms = existing.lease.registered_at_ms.min(now_ms);
                }
                self.feed.record(Change::Upsert {
                    instance: instance.clone(),
                });
                *slot = Some(Slot::Live(InstanceRecord {
                    instance,
                    lease,
                    last_updated_ms: ts,
                    origin_node: origin.clone(),
                }));
                ApplyOutcome::Applied
            }),

            ReplicationAction::Renew { status, .. } => {
                let applied = self.store.update(&key, |record| {
                    record.lease.renew(now_ms);
                    if ts >= record.last_updated_ms {
                        record.last_updated_ms = ts;
                        record.origin_node = origin.clone();
                        if let Some(s) = status.filter(|s| *s != record.instance.status) {
                            record.instance.status = s;
                            self.feed.record(Change::Upsert {
                                instance: record.instance.clone(),
                            });
                        }
                    }
                });
                match applied {
                    Some(()) => {
                        self.preservation.meter().record(now_ms);
                        ApplyOutcome::Applied
                    }
                    None => ApplyOutcome::NotFound,
                }
            }

            ReplicationAction::Cancel { .. } | ReplicationAction::Evict { .. } => {
                self.store.with_slot(key.clone(), |slot| match slot.take() {
                    Some(Slot::Live(record)) if ts < record.last_updated_ms => {
                        *slot = Some(Slot::Live(record));
                        ApplyOutcome::Stale
                    }
                    Some(Slot::Live(_)) => {
                        self.feed.record(Change::Delete { key: key.clone() });
                        *slot = Some(Slot::Tombstone { removed_at_ms: ts });
                        ApplyOutcome::Applied
                    }
                    Some(Slot::Tombstone { removed_at_ms }) => {
                        *slot = Some(Slot::Tombstone {
                            removed_at_ms: removed_at_ms.max(ts),
                        });
                        ApplyOutcome::Applied
                    }
                    None => {
                        *slot = Some(Slot::Tombstone { removed_at_ms: ts });
                        ApplyOutcome::Applied
                    }
                })
            }

            ReplicationAction::StatusUpdate { status, .. } => self
                .store
                .update(&key, |record| {
                    if ts < record.last_updated_ms {
                        return ApplyOutcome::Stale;
                    }
                    record.last_updated_ms = ts;
                    record.origin_node = origin.clone();
                    if record.instance.status != status {
                        record.instance.status = status;
                        self.feed.record(Change::Upsert {
                            instance: record.instance.clone(),
                        });
                    }
                    ApplyOutcome::Applied
                })
                .unwrap_or(ApplyOutcome::NotFound),
        };

        debug!(
            key = %key,
            action = kind,
            origin = %origin,
            timestamp_ms = ts,
            outcome = ?outcome,
            "replicated event processed"
        );
        outcome
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Remove `key` if `predicate` holds, recording the feed change under the
    /// key lock. Returns the removed record and the tombstone timestamp.
    pub(crate) fn remove_key(
        &self,
        key: &InstanceKey,
        now_ms: u64,
        predicate: impl FnOnce(&InstanceRecord) -> bool,
    ) -> (Option<InstanceRecord>, u64) {
        self.store.with_slot(key.clone(), |slot| {
            let remove = match slot.as_ref() {
                Some(Slot::Live(record)) => predicate(record),
                _ => false,
            };

            match slot.take() {
                Some(Slot::Live(record)) if remove => {
                    let stamp_ms = now_ms.max(record.last_updated_ms);
                    self.feed.record(Change::Delete { key: key.clone() });
                    *slot = Some(Slot::Tombstone {
                        removed_at_ms: stamp_ms,
                    });
                    (Some(record), stamp_ms)
                }
                Some(Slot::Live(record)) => {
                    let stamp_ms = record.last_updated_ms;
                    *slot = Some(Slot::Live(record));
                    (None, stamp_ms)
                }
                Some(Slot::Tombstone { removed_at_ms }) => {
                    let stamp_ms = removed_at_ms.max(now_ms);
                    *slot = Some(Slot::Tombstone {
                        removed_at_ms: stamp_ms,
                    });
                    (None, stamp_ms)
                }
                None => {
                    *slot = Some(Slot::Tombstone {
                        removed_at_ms: now_ms,
                    });
                    (None, now_ms)
                }
            }
        })
    }

    pub(crate) fn publish(&self, timestamp_ms: u64, action: ReplicationAction) {
        if let Some(sink) = &self.sink {
            sink.publish(ReplicationEvent::new(
                self.node_id.clone(),
                timestamp_ms,
                action,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::ManualClock;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct CapturingSink {
        events: Mutex<Vec<ReplicationEvent>>,
    }

    impl CapturingSink {
        fn take(&self) -> Vec<ReplicationEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl ReplicationSink for CapturingSink {
        fn publish(&self, event: ReplicationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn registry() -> (Registry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = Registry::with_clock(MusterConfig::default(), node("node-a"), clock.clone());
        (registry, clock)
    }

    fn registry_with_sink() -> (Registry, Arc<ManualClock>, Arc<CapturingSink>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let sink = Arc::new(CapturingSink::default());
        let registry = Registry::with_providers(
            MusterConfig::default(),
            node("node-a"),
            clock.clone(),
            Some(sink.clone()),
        );
        (registry, clock, sink)
    }

    fn req(service: &str, id: &str) -> RegisterRequest {
        RegisterRequest::new(service, id, "10.0.0.1", 8080)
    }

    #[test]
    fn test_register_and_query() {
        let (registry, _) = registry();
        registry
            .register(req("Billing", "b-1").with_metadata("zone", "eu-1"))
            .unwrap();

        let instances = registry.query("BILLING").unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].metadata["zone"], "eu-1");
        assert_eq!(instances[0].status, InstanceStatus::Up);

        assert!(registry.query("unknown").unwrap().is_empty());
        assert!(matches!(
            registry.query(""),
            Err(RegistryError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_register_invalid_leaves_store_untouched() {
        let (registry, _) = registry();
        let err = registry.register(req("billing", "b-1").with_duration_secs(0));
        assert!(matches!(err, Err(RegistryError::InvalidArgument { .. })));
        assert!(registry.store().is_empty());
        assert_eq!(registry.query_all(None).version(), 0);
    }

    #[test]
    fn test_reregister_is_refresh() {
        let (registry, clock) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        clock.advance_secs(10);

        let mut second = req("billing", "b-1");
        second.address = "10.0.0.2".into();
        registry.register(second).unwrap();

        let instances = registry.query("billing").unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].address, "10.0.0.2");
    }

    #[test]
    fn test_renew_not_found_after_cancel() {
        let (registry, _) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        assert!(registry.renew("billing", "b-1", None).is_ok());

        assert!(registry.cancel("billing", "b-1").unwrap());
        assert!(!registry.cancel("billing", "b-1").unwrap());

        assert!(matches!(
            registry.renew("billing", "b-1", None),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.query("billing").unwrap().is_empty());
    }

    #[test]
    fn test_cancel_only_removes_target() {
        let (registry, _) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        registry.register(req("billing", "b-2")).unwrap();
        registry.register(req("search", "s-1")).unwrap();

        registry.cancel("billing", "b-1").unwrap();

        let ids: Vec<String> = registry
            .query("billing")
            .unwrap()
            .into_iter()
            .map(|i| i.instance_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b-2"]);
        assert_eq!(registry.query("search").unwrap().len(), 1);
    }

    #[test]
    fn test_update_status_keeps_lease_clock() {
        let (registry, clock) = registry();
        let before = registry.register(req("billing", "b-1")).unwrap();
        clock.advance_secs(40);

        let after = registry
            .update_status("billing", "b-1", InstanceStatus::OutOfService)
            .unwrap();
        assert_eq!(after.instance.status, InstanceStatus::OutOfService);
        assert_eq!(after.lease.last_renewed_at_ms, before.lease.last_renewed_at_ms);

        assert!(matches!(
            registry.update_status("billing", "ghost", InstanceStatus::Down),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_get_instance_reports_inconsistency() {
        let (registry, _) = registry();
        let record = registry.register(req("billing", "b-1")).unwrap();
        let orphan_key = InstanceKey::parse("billing", "b-9").unwrap();
        registry.store().insert_raw(orphan_key, record);

        assert!(matches!(
            registry.get_instance("billing", "b-9"),
            Err(RegistryError::InternalInconsistency { .. })
        ));
        assert!(registry.get_instance("billing", "b-1").is_ok());
    }

    #[test]
    fn test_feed_tracks_mutations() {
        let (registry, _) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        let v1 = registry.query_all(None).version();
        assert_eq!(v1, 1);

        // plain renewals do not churn the feed
        registry.renew("billing", "b-1", None).unwrap();
        assert_eq!(registry.query_all(None).version(), 1);

        registry
            .renew("billing", "b-1", Some(InstanceStatus::Down))
            .unwrap();
        registry.cancel("billing", "b-1").unwrap();

        match registry.query_all(Some(v1)) {
            FeedResponse::Delta {
                version, changes, ..
            } => {
                assert_eq!(version, 3);
                assert!(matches!(changes[0].change, Change::Upsert { .. }));
                assert!(matches!(changes[1].change, Change::Delete { .. }));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_local_mutations_are_published() {
        let (registry, _, sink) = registry_with_sink();
        registry.register(req("billing", "b-1")).unwrap();
        registry.renew("billing", "b-1", None).unwrap();
        registry
            .update_status("billing", "b-1", InstanceStatus::Down)
            .unwrap();
        registry.cancel("billing", "b-1").unwrap();
        let _ = registry.renew("billing", "b-1", None);

        let events = sink.take();
        let names: Vec<&str> = events.iter().map(|e| e.action.name()).collect();
        assert_eq!(names, vec!["register", "renew", "status_update", "cancel"]);
        assert!(events.iter().all(|e| e.replicated && e.origin_node == node("node-a")));
        assert!(events.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    }

    #[test]
    fn test_replicated_events_are_not_republished() {
        let (registry, clock, sink) = registry_with_sink();
        let (instance, _) = req("billing", "b-1").into_instance().unwrap();
        let event = ReplicationEvent::new(
            node("node-b"),
            clock.now_ms(),
            ReplicationAction::Register {
                instance,
                duration_secs: 30,
            },
        );
        assert_eq!(registry.apply_replicated(event), ApplyOutcome::Applied);
        assert_eq!(registry.query("billing").unwrap().len(), 1);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_replicated_register_is_validated() {
        let (registry, clock) = registry();
        let event: ReplicationEvent = serde_json::from_value(serde_json::json!({
            "origin_node": "node-b",
            "timestamp_ms": clock.now_ms(),
            "replicated": true,
            "action": {
                "type": "register",
                "instance": {
                    "service_name": "billing",
                    "instance_id": "b-1",
                    "address": "",
                    "port": 0
                },
                "duration_secs": 30
            }
        }))
        .unwrap();

        assert_eq!(registry.apply_replicated(event), ApplyOutcome::Rejected);
        assert!(registry.store().is_empty());
        assert_eq!(registry.query_all(None).version(), 0);
    }

    #[test]
    fn test_cancel_excludes_key_while_other_keys_churn() {
        let (registry, _) = registry();
        let rounds = 200;

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for round in 0..rounds {
                        let id = format!("churn-{}-{}", worker, round % 8);
                        registry.register(req("billing", &id)).unwrap();
                        registry.renew("billing", &id, None).unwrap();
                        if round % 3 == 0 {
                            registry.cancel("billing", &id).unwrap();
                        }
                    }
                });
            }

            let registry = &registry;
            scope.spawn(move || {
                for _ in 0..rounds {
                    registry.register(req("billing", "target")).unwrap();
                    registry.cancel("billing", "target").unwrap();
                    let ids: Vec<String> = registry
                        .query("billing")
                        .unwrap()
                        .into_iter()
                        .map(|i| i.instance_id.to_string())
                        .collect();
                    assert!(!ids.iter().any(|id| id == "target"));
                }
            });
        });

        let instances = registry.query("billing").unwrap();
        assert!(instances.iter().all(|i| i.instance_id.as_str() != "target"));
        assert!(registry.get_instance("billing", "target").is_err());
        // 8 ids per worker; the final rounds 192, 195 and 198 end in a cancel
        assert_eq!(instances.len(), 4 * 5);
    }

    #[test]
    fn test_replicated_last_write_wins() {
        let (registry, clock) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        let local_ts = clock.now_ms();
        let key = InstanceKey::parse("billing", "b-1").unwrap();

        // older status from a peer is discarded
        let stale = ReplicationEvent::new(
            node("node-b"),
            local_ts - 1,
            ReplicationAction::StatusUpdate {
                key: key.clone(),
                status: InstanceStatus::Down,
            },
        );
        assert_eq!(registry.apply_replicated(stale), ApplyOutcome::Stale);
        assert_eq!(registry.query("billing").unwrap()[0].status, InstanceStatus::Up);

        // newer status wins
        let fresh = ReplicationEvent::new(
            node("node-b"),
            local_ts + 5,
            ReplicationAction::StatusUpdate {
                key: key.clone(),
                status: InstanceStatus::Down,
            },
        );
        assert_eq!(registry.apply_replicated(fresh), ApplyOutcome::Applied);
        assert_eq!(registry.query("billing").unwrap()[0].status, InstanceStatus::Down);

        // an older cancel cannot remove the newer record
        let old_cancel = ReplicationEvent::new(
            node("node-c"),
            local_ts,
            ReplicationAction::Cancel { key },
        );
        assert_eq!(registry.apply_replicated(old_cancel), ApplyOutcome::Stale);
        assert_eq!(registry.query("billing").unwrap().len(), 1);
    }

    #[test]
    fn test_tombstone_blocks_older_register() {
        let (registry, clock) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        clock.advance_secs(1);
        registry.cancel("billing", "b-1").unwrap();

        let (instance, _) = req("billing", "b-1").into_instance().unwrap();
        let late = ReplicationEvent::new(
            node("node-b"),
            clock.now_ms() - 500,
            ReplicationAction::Register {
                instance,
                duration_secs: 30,
            },
        );
        assert_eq!(registry.apply_replicated(late), ApplyOutcome::Stale);
        assert!(registry.query("billing").unwrap().is_empty());
    }

    #[test]
    fn test_replicated_renew_extends_liveness_even_when_stale() {
        let (registry, clock) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        let key = InstanceKey::parse("billing", "b-1").unwrap();
        clock.advance_secs(60);
        registry
            .update_status("billing", "b-1", InstanceStatus::Starting)
            .unwrap();

        let renew = ReplicationEvent::new(
            node("node-b"),
            clock.now_ms() - 10,
            ReplicationAction::Renew {
                key: key.clone(),
                status: Some(InstanceStatus::Up),
            },
        );
        assert_eq!(registry.apply_replicated(renew), ApplyOutcome::Applied);

        let record = registry.get_instance("billing", "b-1").unwrap();
        assert_eq!(record.lease.last_renewed_at_ms, clock.now_ms());
        // data is last-write-wins: the older status did not apply
        assert_eq!(record.instance.status, InstanceStatus::Starting);
    }

    #[test]
    fn test_replicated_renew_unknown_is_not_found() {
        let (registry, clock) = registry();
        let event = ReplicationEvent::new(
            node("node-b"),
            clock.now_ms(),
            ReplicationAction::Renew {
                key: InstanceKey::parse("billing", "b-1").unwrap(),
                status: None,
            },
        );
        assert_eq!(registry.apply_replicated(event), ApplyOutcome::NotFound);
        assert!(registry.store().is_empty());
    }

    #[test]
    fn test_stats() {
        let (registry, _) = registry();
        registry.register(req("billing", "b-1")).unwrap();
        registry.register(req("search", "s-1")).unwrap();
        let stats = registry.stats();
        assert_eq!(stats.instances_count, 2);
        assert_eq!(stats.services_count, 2);
        assert_eq!(stats.feed_version, 2);
        assert!(!stats.replication_enabled);
    }
}
