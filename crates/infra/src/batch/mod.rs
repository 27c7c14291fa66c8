//! Scheduled suggestion batches.
//!
//! A batch walks every active connection, builds automation contexts, and
//! generates, validates and gates one suggestion per context. At most
//! `max_concurrent` batches run at once; a trigger that finds no free slot is
//! rejected, not queued.

mod lease;
mod orchestrator;
mod scheduler;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use homeflow_ai::AiError;
use homeflow_core::BatchId;

use crate::store::StoreError;

pub use lease::{ConnectionLease, ConnectionLeases};
pub use orchestrator::{BatchDeps, BatchHandle, BatchOrchestrator, TriggerOutcome};
pub use scheduler::{BatchScheduler, SchedulerHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub interval: Duration,
    pub max_concurrent: usize,
    pub sub_batch_size: usize,
    /// Concurrent context generations within one batch.
    pub workers: usize,
    /// Recorded on every batch (`BatchRecord::data_source`).
    pub data_source: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6 * 60 * 60),
            max_concurrent: 3,
            sub_batch_size: 100,
            workers: 8,
            data_source: "pattern-store".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_sub_batch_size(mut self, n: usize) -> Self {
        self.sub_batch_size = n;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Running)
    }
}

/// Audit record of one batch run. Created `Running`, updated once when the
/// run ends.
///
/// `generated_count + error_count + empty_count == contexts_attempted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub generated_count: u64,
    pub error_count: u64,
    /// Contexts the generator returned nothing for (timeout, unusable output).
    pub empty_count: u64,
    pub contexts_attempted: u64,
    /// Connections skipped because another batch held their lease.
    pub skipped_connections: u64,
    pub data_source: String,
    pub failure: Option<String>,
}

impl BatchRecord {
    pub fn start(data_source: impl Into<String>) -> Self {
        Self {
            batch_id: BatchId::new(),
            status: BatchStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            generated_count: 0,
            error_count: 0,
            empty_count: 0,
            contexts_attempted: 0,
            skipped_connections: 0,
            data_source: data_source.into(),
            failure: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("all {0} batch slots are busy")]
    AtCapacity(usize),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pattern data: {0}")]
    Patterns(#[from] AiError),

    #[error("batch run panicked: {0}")]
    Panicked(String),

    #[error("batch task was cancelled")]
    Cancelled,
}
