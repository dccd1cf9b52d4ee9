//! Client cache feed
//!
//! TigerStyle: Monotonic version, bounded changelog, explicit fallback.
//!
//! Discovery clients cache the registry and poll for changes. Every committed
//! mutation bumps the version and appends to a bounded changelog. A client
//! holding version `V` gets the changes after `V`; if `V` has fallen off the
//! log (or is unknown) it gets a full snapshot instead.
//!
//! The version for a full snapshot is read *before* the store is walked. The
//! snapshot can therefore already contain changes the client will later see
//! again as deltas; applying an upsert or delete twice is harmless.

use crate::instance::{InstanceKey, ServiceInstance, ServiceName};
use crate::store::InstanceStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A change visible to discovery clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    /// Instance added or modified
    Upsert { instance: ServiceInstance },
    /// Instance cancelled or evicted
    Delete { key: InstanceKey },
}

/// A change tagged with the version it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub version: u64,
    pub change: Change,
}

/// Answer to a `query_all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedResponse {
    Full {
        version: u64,
        services: BTreeMap<ServiceName, Vec<ServiceInstance>>,
    },
    Delta {
        version: u64,
        since_version: u64,
        changes: Vec<ChangeEntry>,
    },
}

impl FeedResponse {
    pub fn version(&self) -> u64 {
        match self {
            Self::Full { version, .. } | Self::Delta { version, .. } => *version,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

#[derive(Debug)]
struct Changelog {
    version: u64,
    entries: VecDeque<ChangeEntry>,
}

/// Version counter plus bounded changelog
#[derive(Debug)]
pub struct ClientFeed {
    log: Mutex<Changelog>,
    capacity: usize,
}

impl ClientFeed {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "changelog capacity must be positive");
        Self {
            log: Mutex::new(Changelog {
                version: 0,
                entries: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Changelog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Append a change; returns the new version
    pub fn record(&self, change: Change) -> u64 {
        let mut log = self.lock();
        log.version += 1;
        let version = log.version;
        if log.entries.len() == self.capacity {
            log.entries.pop_front();
        }
        log.entries.push_back(ChangeEntry { version, change });

        debug_assert!(log.entries.len() <= self.capacity);
        version
    }

    /// Changes after `since`, or `None` if they are no longer all retained
    pub fn delta_since(&self, since: u64) -> Option<(u64, Vec<ChangeEntry>)> {
        let log = self.lock();
        if since > log.version {
            return None;
        }
        if since == log.version {
            return Some((log.version, Vec::new()));
        }
        let oldest = log.entries.front().map(|e| e.version)?;
        if since + 1 < oldest {
            return None;
        }
        let changes = log
            .entries
            .iter()
            .filter(|e| e.version > since)
            .cloned()
            .collect();
        Some((log.version, changes))
    }

    /// Full snapshot without a delta attempt
    pub fn full(&self, store: &InstanceStore) -> FeedResponse {
        let version = self.version();
        FeedResponse::Full {
            version,
            services: store.list_all(),
        }
    }

    /// Delta when possible, full snapshot otherwise
    pub fn query(&self, since: Option<u64>, store: &InstanceStore) -> FeedResponse {
        if let Some(since) = since {
            if let Some((version, changes)) = self.delta_since(since) {
                return FeedResponse::Delta {
                    version,
                    since_version: since,
                    changes,
                };
            }
        }
        self.full(store)
    }
}
