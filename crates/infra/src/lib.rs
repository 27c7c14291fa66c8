//! `homeflow-infra`: the stateful and IO-bound half of the system.
//!
//! - ingestion pipeline wiring the filter engine to metrics and publishing
//! - metrics recorder with windowed flushes
//! - stream publisher with retries and dead letters
//! - suggestion batch orchestrator and its scheduler
//! - stores, env config, HTTP AI backends, Redis broker

pub mod ai;
pub mod batch;
pub mod config;
pub mod event_bus;
pub mod ingest;
pub mod metrics;
pub mod store;
pub mod stream;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_support;

pub use ai::{AiBackendConfig, build_backend};
pub use batch::{
    BatchConfig, BatchDeps, BatchError, BatchHandle, BatchOrchestrator, BatchRecord, BatchScheduler, BatchStatus,
    SchedulerHandle, TriggerOutcome,
};
pub use config::{ConfigError, PipelineConfig};
pub use ingest::IngestPipeline;
pub use metrics::{InMemoryMetricsSink, MetricsConfig, MetricsRecorder, MetricsSink, ProcessingMetrics, ProcessingStats};
pub use store::StoreError;
pub use stream::{PublisherConfig, PublisherHandle, PublisherStats, RetryPolicy, StreamPublisher};
