//! Server state
//!
//! TigerStyle: One cheap-to-clone handle shared by every handler.

use muster_cluster::{Gossiper, PeerStats};
use muster_registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<Registry>,
    /// Present only when peers are configured
    gossiper: Option<Arc<Gossiper>>,
    start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, gossiper: Option<Arc<Gossiper>>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                gossiper,
                start_time: Instant::now(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn gossiper(&self) -> Option<&Arc<Gossiper>> {
        self.inner.gossiper.as_ref()
    }

    /// Per-peer replication figures; empty when standalone
    pub fn peer_stats(&self) -> Vec<PeerStats> {
        self.inner
            .gossiper
            .as_ref()
            .map(|g| g.stats())
            .unwrap_or_default()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
