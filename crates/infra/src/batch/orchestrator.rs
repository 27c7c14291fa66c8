//! Batch run state machine: IDLE → RUNNING → {COMPLETED, FAILED}.
//!
//! - A run holds one of `max_concurrent` slots from the moment its record is
//!   created until the record reaches a terminal status.
//! - Connections are processed one after another, each in its own task so a
//!   panic is contained to that connection and counted as one error.
//! - A connection's contexts are split into sub-batches. Each sub-batch fans
//!   out over a worker pool bounded by `workers` and is fully joined before
//!   the next starts.
//! - Only a failure outside any connection (e.g. listing connections) marks
//!   the run `Failed`. Suggestions already persisted are kept.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use homeflow_ai::{
    AutomationContext, ContextAggregator, PatternSource, SafetyLimitEnforcer, SuggestionGenerator,
    SuggestionValidator, UserPreferences,
};
use homeflow_core::{BatchId, ConnectionId};

use super::lease::ConnectionLeases;
use super::{BatchConfig, BatchError, BatchRecord, BatchStatus};
use crate::store::{BatchStore, ConnectionDirectory, SuggestionStore};

/// Collaborators a batch run reads from and writes to.
#[derive(Clone)]
pub struct BatchDeps {
    pub connections: Arc<dyn ConnectionDirectory>,
    pub patterns: Arc<dyn PatternSource>,
    pub aggregator: ContextAggregator,
    pub generator: Arc<SuggestionGenerator>,
    pub validator: Arc<SuggestionValidator>,
    pub enforcer: Arc<SafetyLimitEnforcer>,
    pub batches: Arc<dyn BatchStore>,
    pub suggestions: Arc<dyn SuggestionStore>,
}

/// Result of asking for a run.
#[derive(Debug)]
pub enum TriggerOutcome {
    Accepted(BatchHandle),
    /// Every slot was busy. No record was created.
    Rejected { reason: String },
}

impl TriggerOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TriggerOutcome::Accepted(_))
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            TriggerOutcome::Accepted(h) => Some(h.batch_id),
            TriggerOutcome::Rejected { .. } => None,
        }
    }
}

/// An accepted, in-flight run.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: BatchId,
    join: JoinHandle<BatchRecord>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Wait for the run to reach a terminal status.
    pub async fn wait(self) -> Result<BatchRecord, BatchError> {
        self.join.await.map_err(|e| join_failure(&e))
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    attempted: AtomicU64,
    generated: AtomicU64,
    errors: AtomicU64,
    empty: AtomicU64,
    skipped_connections: AtomicU64,
}

enum ContextOutcome {
    Generated,
    Empty,
}

impl RunCounters {
    fn record(&self, outcome: &Result<ContextOutcome, ()>) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
        let counter = match outcome {
            Ok(ContextOutcome::Generated) => &self.generated,
            Ok(ContextOutcome::Empty) => &self.empty,
            Err(()) => &self.errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn write_into(&self, record: &mut BatchRecord) {
        record.contexts_attempted = self.attempted.load(Ordering::SeqCst);
        record.generated_count = self.generated.load(Ordering::SeqCst);
        record.error_count = self.errors.load(Ordering::SeqCst);
        record.empty_count = self.empty.load(Ordering::SeqCst);
        record.skipped_connections = self.skipped_connections.load(Ordering::SeqCst);
    }
}

pub struct BatchOrchestrator {
    deps: BatchDeps,
    config: BatchConfig,
    slots: Arc<Semaphore>,
    leases: ConnectionLeases,
}

impl core::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("config", &self.config)
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    pub fn new(deps: BatchDeps, config: BatchConfig) -> Self {
        let max = config.max_concurrent.max(1);
        Self {
            deps,
            config,
            slots: Arc::new(Semaphore::new(max)),
            leases: ConnectionLeases::new(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn leases(&self) -> &ConnectionLeases {
        &self.leases
    }

    /// Batches currently holding a slot.
    pub fn running(&self) -> usize {
        self.config
            .max_concurrent
            .max(1)
            .saturating_sub(self.slots.available_permits())
    }

    /// Start a run if a slot is free. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                let reason = format!(
                    "max concurrent batches ({}) already running",
                    self.config.max_concurrent.max(1)
                );
                warn!(reason = %reason, "batch skipped");
                return TriggerOutcome::Rejected { reason };
            }
        };

        let record = BatchRecord::start(self.config.data_source.clone());
        if let Err(e) = self.deps.batches.insert(&record) {
            error!(error = %e, "failed to create batch record");
            return TriggerOutcome::Rejected {
                reason: format!("cannot create batch record: {e}"),
            };
        }

        let batch_id = record.batch_id;
        info!(batch_id = %batch_id, data_source = %record.data_source, "batch started");

        let this = self.clone();
        let join = tokio::spawn(async move {
            // Held until the record is terminal.
            let _slot = permit;
            this.drive(record).await
        });

        TriggerOutcome::Accepted(BatchHandle { batch_id, join })
    }

    /// Trigger and wait for completion.
    pub async fn run_now(self: &Arc<Self>) -> Result<BatchRecord, BatchError> {
        match self.trigger() {
            TriggerOutcome::Accepted(handle) => handle.wait().await,
            TriggerOutcome::Rejected { .. } => {
                Err(BatchError::AtCapacity(self.config.max_concurrent.max(1)))
            }
        }
    }

    /// Wait until no batch is running.
    pub async fn wait_idle(&self) {
        let all = self.config.max_concurrent.max(1) as u32;
        if let Ok(permits) = self.slots.acquire_many(all).await {
            drop(permits);
        }
    }

    async fn drive(self: Arc<Self>, mut record: BatchRecord) -> BatchRecord {
        let counters = Arc::new(RunCounters::default());
        let batch_id = record.batch_id;

        let run = tokio::spawn({
            let this = self.clone();
            let counters = counters.clone();
            async move { this.run(batch_id, counters).await }
        });
        let outcome = match run.await {
            Ok(result) => result,
            Err(e) => Err(join_failure(&e)),
        };

        counters.write_into(&mut record);
        record.end_time = Some(Utc::now());
        match outcome {
            Ok(()) => {
                record.status = BatchStatus::Completed;
                info!(
                    batch_id = %batch_id,
                    attempted = record.contexts_attempted,
                    generated = record.generated_count,
                    errors = record.error_count,
                    empty = record.empty_count,
                    skipped_connections = record.skipped_connections,
                    "batch completed"
                );
            }
            Err(e) => {
                record.status = BatchStatus::Failed;
                record.failure = Some(e.to_string());
                error!(batch_id = %batch_id, error = %e, "batch failed");
            }
        }

        if let Err(e) = self.deps.batches.update(&record) {
            error!(batch_id = %batch_id, error = %e, "failed to finalize batch record");
        }
        record
    }

    async fn run(self: Arc<Self>, batch_id: BatchId, counters: Arc<RunCounters>) -> Result<(), BatchError> {
        let connections = self.deps.connections.active_connections()?;
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));

        for connection_id in connections {
            let Some(lease) = self.leases.try_acquire(connection_id) else {
                counters.skipped_connections.fetch_add(1, Ordering::SeqCst);
                warn!(
                    batch_id = %batch_id,
                    connection_id = %connection_id,
                    "connection is being processed by another batch, skipping"
                );
                continue;
            };

            let task = tokio::spawn({
                let this = self.clone();
                let counters = counters.clone();
                let workers = workers.clone();
                async move {
                    let _lease = lease;
                    this.process_connection(batch_id, connection_id, counters, workers).await
                }
            });

            let failure = match task.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(join_failure(&e)),
            };
            if let Some(e) = failure {
                counters.record(&Err(()));
                warn!(
                    batch_id = %batch_id,
                    connection_id = %connection_id,
                    error = %e,
                    "connection processing failed"
                );
            }
        }

        Ok(())
    }

    async fn process_connection(
        self: Arc<Self>,
        batch_id: BatchId,
        connection_id: ConnectionId,
        counters: Arc<RunCounters>,
        workers: Arc<Semaphore>,
    ) -> Result<(), BatchError> {
        let preferences = Arc::new(self.deps.connections.preferences(connection_id)?);
        let contexts = self
            .deps
            .aggregator
            .build(self.deps.patterns.as_ref(), connection_id, Utc::now())?;

        if contexts.is_empty() {
            debug!(batch_id = %batch_id, connection_id = %connection_id, "no contexts");
            return Ok(());
        }

        let chunk_size = self.config.sub_batch_size.max(1);
        for (n, chunk) in contexts.chunks(chunk_size).enumerate() {
            debug!(
                batch_id = %batch_id,
                connection_id = %connection_id,
                sub_batch = n,
                contexts = chunk.len(),
                "processing sub-batch"
            );

            let mut set = JoinSet::new();
            for context in chunk.iter().cloned() {
                let this = self.clone();
                let workers = workers.clone();
                let preferences = preferences.clone();
                set.spawn(async move {
                    let context_id = context.context_id;
                    // Closed only if the batch is torn down.
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return (context_id, Err(BatchError::Cancelled));
                    };
                    let outcome = this.process_context(batch_id, context, &preferences).await;
                    (context_id, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                let outcome = match joined {
                    Ok((_, Ok(outcome))) => Ok(outcome),
                    Ok((context_id, Err(e))) => {
                        warn!(batch_id = %batch_id, context_id = %context_id, error = %e, "context failed");
                        Err(())
                    }
                    Err(e) => {
                        warn!(batch_id = %batch_id, error = %join_failure(&e), "context task failed");
                        Err(())
                    }
                };
                counters.record(&outcome);
            }
        }

        Ok(())
    }

    async fn process_context(
        &self,
        batch_id: BatchId,
        context: AutomationContext,
        preferences: &UserPreferences,
    ) -> Result<ContextOutcome, BatchError> {
        let Some(suggestion) = self.deps.generator.generate(&context, preferences).await else {
            return Ok(ContextOutcome::Empty);
        };

        let mut suggestion = suggestion.with_batch(batch_id);
        let report = self.deps.validator.validate(&suggestion, &context);
        suggestion.apply_validation(report);

        if suggestion.is_valid() && suggestion.confidence < preferences.min_confidence {
            debug!(
                suggestion_id = %suggestion.id,
                confidence = suggestion.confidence,
                "below owner's minimum confidence, discarding"
            );
            return Ok(ContextOutcome::Empty);
        }

        let decision = self.deps.enforcer.evaluate(&suggestion);
        suggestion.apply_approval(decision);

        self.deps.suggestions.insert(&suggestion)?;
        Ok(ContextOutcome::Generated)
    }
}

fn join_failure(e: &JoinError) -> BatchError {
    if e.is_cancelled() {
        BatchError::Cancelled
    } else {
        BatchError::Panicked(e.to_string())
    }
}
