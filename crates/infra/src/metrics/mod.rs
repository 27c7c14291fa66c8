//! Rolling processing metrics for the ingestion path.
//!
//! Every filter decision bumps sharded counters twice: the cumulative totals
//! that back [`MetricsRecorder::get_processing_stats`], and the current
//! window's counters. When a decision arrives after the current window has
//! ended, the window is flushed to the [`MetricsSink`] as one
//! [`ProcessingMetrics`] row and reset.
//!
//! Writers increment `total` before `kept` on the same shard, and readers load
//! `kept` before `total`, so a reader never observes `kept > total`.

mod counter;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use homeflow_events::FilterDecision;
use homeflow_events::filter::FAIL_OPEN_RULE_ID;

use crate::store::StoreError;

pub use counter::ShardedCounter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub window: Duration,
    pub shards: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            shards: 16,
        }
    }
}

/// One flushed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_events: u64,
    pub kept_events: u64,
    pub avg_latency_ms: f64,
}

/// Cumulative view exposed to monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_events_processed: i64,
    pub kept_events: i64,
    /// Fraction of events discarded by the filter, in `[0, 1]`.
    pub filter_rate: f64,
    /// Mean filter latency in milliseconds.
    pub avg_processing_time: f64,
    pub malformed_events: i64,
    pub rule_errors: i64,
}

/// Destination for flushed windows.
pub trait MetricsSink: Send + Sync {
    fn record(&self, row: ProcessingMetrics) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    rows: Mutex<Vec<ProcessingMetrics>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ProcessingMetrics> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, row: ProcessingMetrics) -> Result<(), StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(row);
        Ok(())
    }
}

#[derive(Debug)]
struct Counters {
    total: ShardedCounter,
    kept: ShardedCounter,
    latency_micros: ShardedCounter,
}

impl Counters {
    fn new(shards: usize) -> Self {
        Self {
            total: ShardedCounter::new(shards),
            kept: ShardedCounter::new(shards),
            latency_micros: ShardedCounter::new(shards),
        }
    }

    fn record(&self, kept: bool, latency_micros: u64) {
        self.total.incr();
        self.latency_micros.add(latency_micros);
        if kept {
            self.kept.incr();
        }
    }
}

#[derive(Debug)]
struct Window {
    start: DateTime<Utc>,
    counters: Counters,
}

pub struct MetricsRecorder {
    window_len: chrono::Duration,
    cumulative: Counters,
    malformed: ShardedCounter,
    rule_errors: ShardedCounter,
    // Writers hold the read side while incrementing; rollover takes the write
    // side, so no increment lands between a flush and its reset.
    window: RwLock<Window>,
    sink: Arc<dyn MetricsSink>,
}

impl core::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("window_len", &self.window_len)
            .finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    pub fn new(config: &MetricsConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self::starting_at(config, sink, Utc::now())
    }

    pub fn starting_at(config: &MetricsConfig, sink: Arc<dyn MetricsSink>, now: DateTime<Utc>) -> Self {
        let window_len = chrono::Duration::from_std(config.window)
            .ok()
            .filter(|d| *d > chrono::Duration::zero())
            .unwrap_or_else(|| chrono::Duration::seconds(60));
        Self {
            window_len,
            cumulative: Counters::new(config.shards),
            malformed: ShardedCounter::new(config.shards),
            rule_errors: ShardedCounter::new(config.shards),
            window: RwLock::new(Window {
                start: align(now, window_len),
                counters: Counters::new(config.shards),
            }),
            sink,
        }
    }

    pub fn record(&self, decision: &FilterDecision, latency: Duration) {
        self.record_at(decision, latency, Utc::now());
    }

    pub fn record_at(&self, decision: &FilterDecision, latency: Duration, now: DateTime<Utc>) {
        self.roll_if_elapsed(now);

        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        if decision.rule_id == FAIL_OPEN_RULE_ID {
            self.rule_errors.incr();
        }

        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        window.counters.record(decision.kept, micros);
        self.cumulative.record(decision.kept, micros);
    }

    /// Count a payload that never became an event.
    pub fn record_malformed(&self) {
        self.malformed.incr();
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let kept = self.cumulative.kept.sum();
        let latency = self.cumulative.latency_micros.sum();
        let total = self.cumulative.total.sum().max(kept);

        let (filter_rate, avg_processing_time) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                (total - kept) as f64 / total as f64,
                latency as f64 / total as f64 / 1000.0,
            )
        };

        ProcessingStats {
            total_events_processed: clamp_i64(total),
            kept_events: clamp_i64(kept),
            filter_rate: filter_rate.clamp(0.0, 1.0),
            avg_processing_time,
            malformed_events: clamp_i64(self.malformed.sum()),
            rule_errors: clamp_i64(self.rule_errors.sum()),
        }
    }

    /// Flush the current window regardless of its age (shutdown).
    pub fn flush_now(&self) {
        self.flush_now_at(Utc::now());
    }

    /// Forced flush at `now`. The next window starts where this row ends.
    pub fn flush_now_at(&self, now: DateTime<Utc>) {
        self.flush_at(now, true);
    }

    fn roll_if_elapsed(&self, now: DateTime<Utc>) {
        let start = self
            .window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .start;
        if now >= start + self.window_len {
            self.flush_at(now, false);
        }
    }

    fn flush_at(&self, now: DateTime<Utc>, force: bool) {
        let row = {
            let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
            let end = window.start + self.window_len;
            // Another writer may have rolled the window while we waited.
            if !force && now < end {
                return;
            }
            let kept = window.counters.kept.take();
            let total = window.counters.total.take();
            let latency = window.counters.latency_micros.take();
            let row = ProcessingMetrics {
                window_start: window.start,
                window_end: if force { now.min(end) } else { end },
                total_events: total,
                kept_events: kept.min(total),
                avg_latency_ms: if total == 0 {
                    0.0
                } else {
                    latency as f64 / total as f64 / 1000.0
                },
            };
            window.start = if force { row.window_end } else { align(now, self.window_len).max(end) };
            row
        };

        if row.total_events == 0 {
            return;
        }
        tracing::debug!(
            window_start = %row.window_start,
            total = row.total_events,
            kept = row.kept_events,
            "flushing metrics window"
        );
        if let Err(e) = self.sink.record(row) {
            tracing::warn!(error = %e, "failed to persist metrics window");
        }
    }
}

fn align(at: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    let len = window.num_milliseconds().max(1);
    let ms = at.timestamp_millis();
    let aligned = ms - ms.rem_euclid(len);
    Utc.timestamp_millis_opt(aligned).single().unwrap_or(at)
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
