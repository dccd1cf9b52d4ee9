//! Background tasks
//!
//! TigerStyle: Explicit task lifecycle; every loop observes shutdown.
//!
//! Two independent timers drive the registry: the eviction sweep and the
//! self-preservation evaluation. Both sleep through the registry's
//! [`TimeProvider`](muster_core::TimeProvider) and stop on a shared signal.

use crate::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns the eviction and self-preservation tasks for one registry
#[derive(Debug)]
pub struct RegistryScheduler {
    registry: Arc<Registry>,
    shutdown: Arc<Notify>,
    shutdown_requested: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryScheduler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            shutdown: Arc::new(Notify::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn both loops; calling twice is a no-op
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let config = self.registry.config();
        let sweep_ms = config.eviction.sweep_interval_secs * 1000;
        let evaluation_ms = config.preservation.evaluation_interval_secs * 1000;

        let registry = self.registry.clone();
        tasks.push(self.spawn_periodic("eviction", sweep_ms, move || {
            let report = registry.evict_expired();
            if !report.is_idle() {
                info!(
                    evicted = report.evicted.len(),
                    suppressed = report.suppressed_count,
                    healed = report.healed.len(),
                    "eviction sweep"
                );
            }
        }));

        let registry = self.registry.clone();
        tasks.push(self.spawn_periodic("preservation", evaluation_ms, move || {
            let stats = registry.evaluate_preservation();
            debug!(
                expected = stats.expected_renewals_per_min,
                actual = stats.actual_renewals_per_min,
                state = ?stats.state,
                "self-preservation evaluated"
            );
        }));

        info!(
            sweep_interval_ms = sweep_ms,
            evaluation_interval_ms = evaluation_ms,
            "registry background tasks started"
        );
    }

    /// Signal both loops and wait for them to exit
    pub async fn stop(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let tasks: Vec<_> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("registry background tasks stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown_requested.load(Ordering::SeqCst)
            && !self
                .tasks
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .is_empty()
    }

    fn spawn_periodic(
        &self,
        name: &'static str,
        interval_ms: u64,
        mut tick: impl FnMut() + Send + 'static,
    ) -> JoinHandle<()> {
        let time = self.registry.time().clone();
        let shutdown = self.shutdown.clone();
        let shutdown_requested = self.shutdown_requested.clone();

        tokio::spawn(async move {
            loop {
                let notified = shutdown.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if shutdown_requested.load(Ordering::SeqCst) {
                    break;
                }

                tokio::select! {
                    _ = time.sleep_ms(interval_ms) => tick(),
                    _ = notified => break,
                }
            }
            debug!(task = name, "background task shutting down");
        })
    }
}

impl Drop for RegistryScheduler {
    fn drop(&mut self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}
