//! Periodic batch trigger.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::orchestrator::{BatchOrchestrator, TriggerOutcome};

/// Fires [`BatchOrchestrator::trigger`] every `interval`.
///
/// The first run happens one interval after start. Ticks missed while the
/// runtime was busy are skipped, not replayed.
pub struct BatchScheduler;

impl BatchScheduler {
    pub fn spawn(orchestrator: Arc<BatchOrchestrator>, interval: Duration) -> SchedulerHandle {
        let enabled = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let join = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let enabled = enabled.clone();
            let shutdown = shutdown.clone();
            async move {
                tracing::info!(interval_secs = interval.as_secs(), "batch scheduler started");

                let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = ticks.tick() => {
                            if !enabled.load(Ordering::SeqCst) {
                                tracing::debug!("scheduling disabled, skipping tick");
                                continue;
                            }
                            if let TriggerOutcome::Accepted(handle) = orchestrator.trigger() {
                                tracing::debug!(batch_id = %handle.batch_id(), "scheduled batch accepted");
                            }
                        }
                    }
                }

                tracing::info!("batch scheduler stopped");
            }
        });

        SchedulerHandle {
            orchestrator,
            enabled,
            shutdown,
            join: Mutex::new(Some(join)),
        }
    }
}

pub struct SchedulerHandle {
    orchestrator: Arc<BatchOrchestrator>,
    enabled: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!("batch scheduling enabled");
    }

    /// Stop firing on ticks. Manual triggers still work.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::info!("batch scheduling disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start a run now, subject to the same capacity limit as scheduled runs.
    pub fn trigger_now(&self) -> TriggerOutcome {
        self.orchestrator.trigger()
    }

    /// Stop the timer and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.lock().await.take() {
            if let Err(e) = join.await {
                tracing::warn!(error = %e, "batch scheduler task ended abnormally");
            }
        }
        self.orchestrator.wait_idle().await;
    }
}
