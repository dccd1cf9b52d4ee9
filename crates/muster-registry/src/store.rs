//! Instance record store
//!
//! TigerStyle: One map, one lock per key, no partially applied writes.
//!
//! Every instance and its lease live in a single [`InstanceRecord`] under one
//! key of a lock-striped [`DashMap`]. Registering, renewing, cancelling and
//! evicting the same key are serialized by that key's shard lock; different
//! keys proceed in parallel. Snapshots walk the map shard by shard, so a
//! reader sees each record either before or after a write, never halfway.
//!
//! A second map indexes instance ids by service so a service query touches
//! only that service's keys. The index is changed only while the slot's shard
//! lock is held, in the same call that creates or drops the slot.
//!
//! Removed keys leave a tombstone carrying the removal timestamp. Replicated
//! writes older than the tombstone are rejected, which keeps a late register
//! from resurrecting a cancelled instance. Tombstones are pruned by the sweep.

use crate::instance::{InstanceId, InstanceKey, ServiceInstance, ServiceName};
use crate::lease::Lease;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use muster_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An instance together with its lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance: ServiceInstance,
    pub lease: Lease,
    /// Timestamp of the last accepted mutation (last-write-wins clock)
    pub last_updated_ms: u64,
    /// Node where the last accepted mutation originated
    pub origin_node: NodeId,
}

impl InstanceRecord {
    pub fn key(&self) -> InstanceKey {
        self.instance.key()
    }

    /// Describe why this record cannot be trusted under `key`, if it cannot
    pub fn inconsistency(&self, key: &InstanceKey) -> Option<String> {
        if &self.instance.key() != key {
            return Some(format!("record identity {} stored under key {}", self.key(), key));
        }
        if !self.lease.is_consistent() {
            return Some(format!("malformed lease {:?}", self.lease));
        }
        None
    }
}

/// Per-key slot: a live record or the memory of a removal
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Live(InstanceRecord),
    Tombstone { removed_at_ms: u64 },
}

impl Slot {
    /// Timestamp that a replicated write must reach to replace this slot
    pub(crate) fn version_ms(&self) -> u64 {
        match self {
            Slot::Live(record) => record.last_updated_ms,
            Slot::Tombstone { removed_at_ms } => *removed_at_ms,
        }
    }
}

/// Aggregate lease figures used by self-preservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseSummary {
    pub leases_count: usize,
    pub duration_secs_total: u64,
}

impl LeaseSummary {
    /// Mean promised renewal interval, if any lease exists
    pub fn average_duration_secs(&self) -> Option<f64> {
        if self.leases_count == 0 {
            None
        } else {
            Some(self.duration_secs_total as f64 / self.leases_count as f64)
        }
    }
}

/// Concurrent in-memory store of instance records
#[derive(Debug, Default)]
pub struct InstanceStore {
    slots: DashMap<InstanceKey, Slot>,
    /// Ids with a slot (live or tombstone), per service
    services: DashMap<ServiceName, BTreeSet<InstanceId>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record under its own key
    pub fn put(&self, record: InstanceRecord) -> Option<InstanceRecord> {
        self.with_slot(record.key(), |slot| match slot.replace(Slot::Live(record)) {
            Some(Slot::Live(previous)) => Some(previous),
            _ => None,
        })
    }

    pub fn get(&self, key: &InstanceKey) -> Option<InstanceRecord> {
        match self.slots.get(key).as_deref() {
            Some(Slot::Live(record)) => Some(record.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        matches!(self.slots.get(key).as_deref(), Some(Slot::Live(_)))
    }

    /// Remove a record, leaving a tombstone; no-op if absent
    pub fn remove(&self, key: &InstanceKey, removed_at_ms: u64) -> Option<InstanceRecord> {
        self.remove_if(key, removed_at_ms, |_| true)
    }

    /// Remove a record only if `predicate` still holds under the key's lock
    pub fn remove_if(
        &self,
        key: &InstanceKey,
        removed_at_ms: u64,
        predicate: impl FnOnce(&InstanceRecord) -> bool,
    ) -> Option<InstanceRecord> {
        self.with_slot(key.clone(), |slot| {
            let remove = match slot.as_ref() {
                Some(Slot::Live(record)) => predicate(record),
                _ => false,
            };
            if !remove {
                return None;
            }
            match slot.take() {
                Some(Slot::Live(record)) => {
                    *slot = Some(Slot::Tombstone {
                        removed_at_ms: removed_at_ms.max(record.last_updated_ms),
                    });
                    Some(record)
                }
                other => {
                    *slot = other;
                    None
                }
            }
        })
    }

    /// Mutate a live record in place; `None` if absent
    pub fn update<R>(
        &self,
        key: &InstanceKey,
        f: impl FnOnce(&mut InstanceRecord) -> R,
    ) -> Option<R> {
        match self.slots.get_mut(key).as_deref_mut() {
            Some(Slot::Live(record)) => Some(f(record)),
            _ => None,
        }
    }

    /// Run `f` with exclusive access to the key's slot
    ///
    /// `f` sees `None` for a never-seen key and may leave `None` to drop the
    /// slot entirely. The key's shard lock is held for the whole call.
    pub(crate) fn with_slot<R>(
        &self,
        key: InstanceKey,
        f: impl FnOnce(&mut Option<Slot>) -> R,
    ) -> R {
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                let placeholder = Slot::Tombstone { removed_at_ms: 0 };
                let mut slot = Some(std::mem::replace(occupied.get_mut(), placeholder));
                let result = f(&mut slot);
                match slot {
                    Some(next) => {
                        *occupied.get_mut() = next;
                    }
                    None => {
                        let (key, _) = occupied.remove_entry();
                        self.unindex(&key);
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(next) = slot {
                    self.index(vacant.key());
                    vacant.insert(next);
                }
                result
            }
        }
    }

    fn index(&self, key: &InstanceKey) {
        self.services
            .entry(key.service.clone())
            .or_default()
            .insert(key.instance_id.clone());
    }

    fn unindex(&self, key: &InstanceKey) {
        if let Some(mut ids) = self.services.get_mut(&key.service) {
            ids.remove(&key.instance_id);
        }
        self.services.remove_if(&key.service, |_, ids| ids.is_empty());
    }

    /// Instances of one service, ordered by instance id
    ///
    /// Reads only the keys indexed under `service`.
    pub fn list_service(&self, service: &ServiceName) -> Vec<ServiceInstance> {
        // the index guard must be released before slots are read
        let ids: Vec<InstanceId> = match self.services.get(service) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        ids.into_iter()
            .filter_map(|id| {
                let key = InstanceKey::new(service.clone(), id);
                match self.slots.get(&key).as_deref() {
                    Some(Slot::Live(record)) => Some(record.instance.clone()),
                    _ => None,
                }
            })
            .collect()
    }

    /// Snapshot grouped by service; services without instances never appear
    pub fn list_all(&self) -> BTreeMap<ServiceName, Vec<ServiceInstance>> {
        let mut groups: BTreeMap<ServiceName, Vec<ServiceInstance>> = BTreeMap::new();
        for entry in self.slots.iter() {
            if let Slot::Live(record) = entry.value() {
                groups
                    .entry(entry.key().service.clone())
                    .or_default()
                    .push(record.instance.clone());
            }
        }
        for instances in groups.values_mut() {
            instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        }
        groups
    }

    /// Flat snapshot of live records keyed as stored
    pub fn records(&self) -> Vec<(InstanceKey, InstanceRecord)> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(record) => Some((entry.key().clone(), record.clone())),
                Slot::Tombstone { .. } => None,
            })
            .collect()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lease_summary(&self) -> LeaseSummary {
        let mut summary = LeaseSummary::default();
        for entry in self.slots.iter() {
            if let Slot::Live(record) = entry.value() {
                summary.leases_count += 1;
                summary.duration_secs_total += record.lease.duration_secs;
            }
        }
        summary
    }

    /// Removal timestamp remembered for `key`, if any
    pub fn tombstone(&self, key: &InstanceKey) -> Option<u64> {
        match self.slots.get(key).as_deref() {
            Some(Slot::Tombstone { removed_at_ms }) => Some(*removed_at_ms),
            _ => None,
        }
    }

    /// Forget removals older than `cutoff_ms`; returns how many were dropped
    pub fn prune_tombstones(&self, cutoff_ms: u64) -> usize {
        let mut pruned = 0;
        self.slots.retain(|key, slot| match slot {
            Slot::Tombstone { removed_at_ms } if *removed_at_ms < cutoff_ms => {
                self.unindex(key);
                pruned += 1;
                false
            }
            _ => true,
        });
        pruned
    }

    /// Keys whose records fail [`InstanceRecord::inconsistency`]
    pub fn inconsistent_keys(&self) -> Vec<(InstanceKey, String)> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(record) => record
                    .inconsistency(entry.key())
                    .map(|reason| (entry.key().clone(), reason)),
                Slot::Tombstone { .. } => None,
            })
            .collect()
    }

    /// Drop an inconsistent record without leaving a tombstone
    pub(crate) fn purge(&self, key: &InstanceKey) -> bool {
        self.with_slot(key.clone(), |slot| {
            let inconsistent = matches!(
                slot.as_ref(),
                Some(Slot::Live(record)) if record.inconsistency(key).is_some()
            );
            if inconsistent {
                *slot = None;
            }
            inconsistent
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: InstanceKey, record: InstanceRecord) {
        self.with_slot(key, |slot| *slot = Some(Slot::Live(record)));
    }
}
