//! Peer transports
//!
//! TigerStyle: Transport is a trait; production and tests share the gossiper.
//!
//! [`HttpPeerTransport`] posts each event as JSON to the peer's
//! `/v1/peers/replicate` route. [`MemoryPeerTransport`] hands events straight
//! to in-process registries and can simulate partitions.

use crate::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use muster_core::NodeId;
use muster_registry::{ApplyOutcome, Registry, ReplicationEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Path peers accept replicated events on
pub const REPLICATE_PATH: &str = "/v1/peers/replicate";

/// A peer's answer to one replicated event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationAck {
    pub node_id: NodeId,
    pub outcome: ApplyOutcome,
}

/// Delivers replication events to one peer at a time
#[async_trait]
pub trait PeerTransport: Send + Sync + std::fmt::Debug {
    /// Send `event` to `peer` and return what the peer did with it
    async fn send(&self, peer: &str, event: &ReplicationEvent) -> ClusterResult<ApplyOutcome>;
}

// =============================================================================
// HTTP
// =============================================================================

/// Production transport over reqwest
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpPeerTransport {
    pub fn new(timeout_ms: u64) -> ClusterResult<Self> {
        assert!(timeout_ms > 0, "timeout must be positive");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ClusterError::peer_unreachable("*", format!("client build failed: {}", e)))?;

        Ok(Self { client, timeout_ms })
    }

    /// Replicate URL for a configured peer address
    ///
    /// Bare `host:port` addresses are treated as plain HTTP.
    pub fn replicate_url(peer: &str) -> String {
        let base = peer.trim().trim_end_matches('/');
        if base.contains("://") {
            format!("{}{}", base, REPLICATE_PATH)
        } else {
            format!("http://{}{}", base, REPLICATE_PATH)
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send(&self, peer: &str, event: &ReplicationEvent) -> ClusterResult<ApplyOutcome> {
        let response = self
            .client
            .post(Self::replicate_url(peer))
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClusterError::peer_unreachable(
                        peer,
                        format!("timed out after {}ms", self.timeout_ms),
                    )
                } else if e.is_connect() {
                    ClusterError::peer_unreachable(peer, format!("connect failed: {}", e))
                } else {
                    ClusterError::peer_unreachable(peer, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::peer_rejected(peer, status.as_u16()));
        }

        let ack: ReplicationAck = response
            .json()
            .await
            .map_err(|e| ClusterError::serialization(format!("bad ack from {}: {}", peer, e)))?;
        Ok(ack.outcome)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// In-process transport for tests
///
/// Events are round-tripped through JSON so the wire format is exercised.
#[derive(Debug, Default)]
pub struct MemoryPeerTransport {
    peers: RwLock<HashMap<String, Arc<Registry>>>,
    partitioned: RwLock<HashSet<String>>,
    delivered_count: AtomicU64,
}

impl MemoryPeerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `registry` reachable as `peer`
    pub fn add_peer(&self, peer: impl Into<String>, registry: Arc<Registry>) {
        self.peers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer.into(), registry);
    }

    /// Fail every send to `peer` until [`heal`](Self::heal) is called
    pub fn partition(&self, peer: &str) {
        self.partitioned
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer.to_string());
    }

    pub fn heal(&self, peer: &str) {
        self.partitioned
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(peer);
    }

    /// Events handed to a peer registry so far
    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MemoryPeerTransport {
    async fn send(&self, peer: &str, event: &ReplicationEvent) -> ClusterResult<ApplyOutcome> {
        if self
            .partitioned
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(peer)
        {
            return Err(ClusterError::peer_unreachable(peer, "partitioned"));
        }

        let registry = self
            .peers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(peer)
            .cloned()
            .ok_or_else(|| ClusterError::peer_unreachable(peer, "unknown peer"))?;

        let wire = serde_json::to_vec(event)?;
        let decoded: ReplicationEvent = serde_json::from_slice(&wire)?;

        self.delivered_count.fetch_add(1, Ordering::SeqCst);
        Ok(registry.apply_replicated(decoded))
    }
}
