//! Replication gossiper
//!
//! TigerStyle: Explicit message passing; one bounded queue per peer.
//!
//! The gossiper is split in two so the registry never owns its own sender
//! tasks:
//!
//! - As a [`ReplicationSink`] it is handed to the registry at construction and
//!   only enqueues. A full queue drops the event with a warning; the request
//!   path never waits on a peer.
//! - [`Gossiper::start`] later spawns one sender task per peer. Each task
//!   delivers its queue in order, retrying unreachable peers with exponential
//!   backoff before giving up on an event.
//!
//! A peer that answers a renewal with `NotFound` missed the registration, so
//! the sender follows up with a full register built from the local record.

use crate::error::{ClusterError, ClusterResult};
use crate::transport::PeerTransport;
use muster_core::ClusterConfig;
use muster_registry::{ApplyOutcome, Registry, ReplicationAction, ReplicationEvent, ReplicationSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Retry policy
// =============================================================================

/// Exponential backoff for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_ms_base: u64,
    pub backoff_ms_max: u64,
    pub attempts_count_max: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            backoff_ms_base: config.retry_backoff_ms_base,
            backoff_ms_max: config.retry_backoff_ms_max,
            attempts_count_max: config.retry_attempts_count_max.max(1),
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.backoff_ms_base
            .saturating_mul(1u64 << shift)
            .min(self.backoff_ms_max)
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Default)]
struct PeerCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    stale: AtomicU64,
    rejected: AtomicU64,
    reregistered: AtomicU64,
    retried: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_failed: AtomicU64,
}

/// Delivery figures for one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub peer: String,
    pub queued_count: usize,
    pub enqueued_count: u64,
    pub delivered_count: u64,
    pub stale_count: u64,
    pub rejected_count: u64,
    pub reregistered_count: u64,
    pub retried_count: u64,
    pub dropped_queue_full_count: u64,
    pub dropped_failed_count: u64,
}

#[derive(Debug)]
struct PeerQueue {
    peer: String,
    tx: mpsc::Sender<ReplicationEvent>,
    counters: Arc<PeerCounters>,
}

// =============================================================================
// Gossiper
// =============================================================================

/// Fans local mutations out to every configured peer
#[derive(Debug)]
pub struct Gossiper {
    queues: Vec<PeerQueue>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<ReplicationEvent>>>>,
    retry: RetryPolicy,
    shutdown: Arc<Notify>,
    shutdown_requested: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gossiper {
    /// Build queues for every peer in `config`; nothing is sent until `start`
    pub fn new(config: &ClusterConfig) -> Self {
        let depth = config.replication_queue_depth.max(1);
        let mut queues = Vec::new();
        let mut receivers = Vec::new();

        for peer in &config.peer_node_addresses {
            let peer = peer.trim().to_string();
            if queues.iter().any(|q: &PeerQueue| q.peer == peer) {
                continue;
            }
            let (tx, rx) = mpsc::channel(depth);
            queues.push(PeerQueue {
                peer,
                tx,
                counters: Arc::new(PeerCounters::default()),
            });
            receivers.push(rx);
        }

        Self {
            queues,
            receivers: Mutex::new(Some(receivers)),
            retry: RetryPolicy::from_config(config),
            shutdown: Arc::new(Notify::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.peer.clone()).collect()
    }

    /// Spawn one sender task per peer
    pub fn start(
        &self,
        registry: Arc<Registry>,
        transport: Arc<dyn PeerTransport>,
    ) -> ClusterResult<()> {
        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(ClusterError::AlreadyStarted)?;

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        for (queue, rx) in self.queues.iter().zip(receivers) {
            let sender = PeerSender {
                peer: queue.peer.clone(),
                registry: registry.clone(),
                transport: transport.clone(),
                retry: self.retry,
                counters: queue.counters.clone(),
            };
            tasks.push(tokio::spawn(sender.run(
                rx,
                self.shutdown.clone(),
                self.shutdown_requested.clone(),
            )));
        }

        info!(
            peers = self.queues.len(),
            attempts_max = self.retry.attempts_count_max,
            "replication started"
        );
        Ok(())
    }

    /// Stop every sender; undelivered events are discarded
    pub async fn stop(&self) -> ClusterResult<()> {
        let tasks: Vec<_> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        if tasks.is_empty() {
            return Err(ClusterError::NotStarted);
        }

        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        futures::future::join_all(tasks).await;

        info!("replication stopped");
        Ok(())
    }

    pub fn stats(&self) -> Vec<PeerStats> {
        self.queues
            .iter()
            .map(|q| {
                let c = &q.counters;
                PeerStats {
                    peer: q.peer.clone(),
                    queued_count: q.tx.max_capacity() - q.tx.capacity(),
                    enqueued_count: c.enqueued.load(Ordering::Relaxed),
                    delivered_count: c.delivered.load(Ordering::Relaxed),
                    stale_count: c.stale.load(Ordering::Relaxed),
                    rejected_count: c.rejected.load(Ordering::Relaxed),
                    reregistered_count: c.reregistered.load(Ordering::Relaxed),
                    retried_count: c.retried.load(Ordering::Relaxed),
                    dropped_queue_full_count: c.dropped_queue_full.load(Ordering::Relaxed),
                    dropped_failed_count: c.dropped_failed.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

impl ReplicationSink for Gossiper {
    fn publish(&self, event: ReplicationEvent) {
        for queue in &self.queues {
            match queue.tx.try_send(event.clone()) {
                Ok(()) => {
                    queue.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    queue
                        .counters
                        .dropped_queue_full
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        peer = %queue.peer,
                        key = %dropped.key(),
                        action = dropped.action.name(),
                        "{}",
                        ClusterError::QueueFull {
                            peer: queue.peer.clone()
                        }
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(peer = %queue.peer, "replication stopped, event discarded");
                }
            }
        }
    }
}

impl Drop for Gossiper {
    fn drop(&mut self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

// =============================================================================
// Per-peer sender
// =============================================================================

struct PeerSender {
    peer: String,
    registry: Arc<Registry>,
    transport: Arc<dyn PeerTransport>,
    retry: RetryPolicy,
    counters: Arc<PeerCounters>,
}

impl PeerSender {
    async fn run(
        self,
        mut rx: mpsc::Receiver<ReplicationEvent>,
        shutdown: Arc<Notify>,
        shutdown_requested: Arc<AtomicBool>,
    ) {
        loop {
            let notified = shutdown.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown_requested.load(Ordering::SeqCst) {
                break;
            }

            let event = tokio::select! {
                _ = notified.as_mut() => break,
                next = rx.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            // retries can sleep; shutdown must not wait them out
            let delivery = async {
                let mut pending = Some(event);
                while let Some(event) = pending.take() {
                    pending = self.deliver(event).await;
                }
            };
            tokio::select! {
                _ = notified.as_mut() => break,
                _ = delivery => {}
            }
        }
        debug!(peer = %self.peer, "replication sender shutting down");
    }

    /// Deliver one event with retries; returns a follow-up event if needed
    async fn deliver(&self, event: ReplicationEvent) -> Option<ReplicationEvent> {
        let mut attempt = 1;
        loop {
            match self.transport.send(&self.peer, &event).await {
                Ok(ApplyOutcome::Applied) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Ok(ApplyOutcome::Stale) => {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %self.peer, key = %event.key(), "peer holds newer state");
                    return None;
                }
                Ok(ApplyOutcome::NotFound) => return self.reregistration(&event),
                Ok(ApplyOutcome::Rejected) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        peer = %self.peer,
                        key = %event.key(),
                        action = event.action.name(),
                        "peer rejected replication event"
                    );
                    return None;
                }
                Err(e) if e.is_retriable() && attempt < self.retry.attempts_count_max => {
                    let delay_ms = self.retry.delay_ms(attempt);
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        peer = %self.peer,
                        attempt,
                        delay_ms,
                        error = %e,
                        "replication failed, retrying"
                    );
                    self.registry.time().sleep_ms(delay_ms).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.counters.dropped_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        peer = %self.peer,
                        key = %event.key(),
                        action = event.action.name(),
                        attempts = attempt,
                        error = %e,
                        "replication event dropped"
                    );
                    return None;
                }
            }
        }
    }

    fn reregistration(&self, event: &ReplicationEvent) -> Option<ReplicationEvent> {
        let ReplicationAction::Renew { key, .. } = &event.action else {
            debug!(peer = %self.peer, key = %event.key(), "peer does not hold instance");
            return None;
        };

        let Some(record) = self.registry.store().get(key) else {
            debug!(peer = %self.peer, key = %key, "instance gone locally, not re-registering");
            return None;
        };

        self.counters.reregistered.fetch_add(1, Ordering::Relaxed);
        info!(peer = %self.peer, key = %key, "peer missed registration, re-registering");

        Some(ReplicationEvent::new(
            self.registry.node_id().clone(),
            record.last_updated_ms,
            ReplicationAction::Register {
                duration_secs: record.lease.duration_secs,
                instance: record.instance,
            },
        ))
    }
}
