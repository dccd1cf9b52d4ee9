//! Replication event model
//!
//! TigerStyle: Explicit message types; every event names its origin and time.
//!
//! The registry describes each local mutation as a [`ReplicationEvent`] and
//! hands it to a [`ReplicationSink`]. Peers apply received events through
//! `Registry::apply_replicated`, which resolves conflicts per key by
//! timestamp (last write wins) and never republishes.

use crate::instance::{InstanceKey, InstanceStatus, ServiceInstance};
use muster_core::NodeId;
use serde::{Deserialize, Serialize};

/// Mutation carried between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationAction {
    /// Full registration (also used to repair a peer that lost the key)
    Register {
        instance: ServiceInstance,
        duration_secs: u64,
    },
    /// Lease renewal, optionally carrying a status
    Renew {
        key: InstanceKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<InstanceStatus>,
    },
    /// Client-initiated removal
    Cancel { key: InstanceKey },
    /// Removal by the eviction sweep
    Evict { key: InstanceKey },
    /// Status override
    StatusUpdate {
        key: InstanceKey,
        status: InstanceStatus,
    },
}

impl ReplicationAction {
    pub fn key(&self) -> InstanceKey {
        match self {
            Self::Register { instance, .. } => instance.key(),
            Self::Renew { key, .. }
            | Self::Cancel { key }
            | Self::Evict { key }
            | Self::StatusUpdate { key, .. } => key.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Renew { .. } => "renew",
            Self::Cancel { .. } => "cancel",
            Self::Evict { .. } => "evict",
            Self::StatusUpdate { .. } => "status_update",
        }
    }
}

/// A mutation stamped for replication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    /// Node where the mutation was first applied
    pub origin_node: NodeId,
    /// Origin's last-write-wins timestamp (Unix ms)
    pub timestamp_ms: u64,
    /// Set on every event sent to a peer; receivers must not forward it
    pub replicated: bool,
    pub action: ReplicationAction,
}

impl ReplicationEvent {
    pub fn new(origin_node: NodeId, timestamp_ms: u64, action: ReplicationAction) -> Self {
        Self {
            origin_node,
            timestamp_ms,
            replicated: true,
            action,
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.action.key()
    }
}

/// What the receiving registry did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Mutation committed
    Applied,
    /// Older than the receiver's state; discarded
    Stale,
    /// Renewal or status update for a key the receiver does not hold
    NotFound,
    /// Carried an instance the receiver's own validation refuses
    Rejected,
}

/// Outbound side of replication
///
/// `publish` is called on the request path after a local mutation commits.
/// Implementations must not block; queue and return.
pub trait ReplicationSink: Send + Sync + std::fmt::Debug {
    fn publish(&self, event: ReplicationEvent);
}
