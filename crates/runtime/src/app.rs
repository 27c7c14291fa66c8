//! Builds the running system from [`PipelineConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use homeflow_ai::{
    ChangeType, ContextAggregator, PatternSource, SafetyLimit, SafetyLimitEnforcer, SuggestionGenerator,
    SuggestionValidator,
};
use homeflow_core::ConnectionId;
use homeflow_events::{EventBus, FilterEngine, InMemoryPartitionedBus, StreamRecord};
use homeflow_infra::batch::{BatchDeps, BatchOrchestrator, BatchScheduler, BatchStatus, SchedulerHandle};
use homeflow_infra::metrics::{InMemoryMetricsSink, MetricsRecorder};
use homeflow_infra::store::{
    BatchStore, InMemoryBatchStore, InMemoryConnectionDirectory, InMemorySafetyLimitStore, InMemorySuggestionStore,
};
use homeflow_infra::stream::{DeadLetterSink, InMemoryDeadLetterSink, PublisherHandle, StreamPublisher};
use homeflow_infra::{IngestPipeline, PipelineConfig, build_backend};

use crate::patterns::JsonFilePatternSource;

/// Process options that are not part of the pipeline itself.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// `HOMEFLOW_PATTERNS_PATH`
    pub patterns_path: Option<PathBuf>,
    /// `HOMEFLOW_CONNECTION_ID`: the hub connection stdin payloads belong to.
    pub connection_id: ConnectionId,
}

impl RuntimeOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let patterns_path = std::env::var_os("HOMEFLOW_PATTERNS_PATH").map(PathBuf::from);
        let connection_id = match std::env::var("HOMEFLOW_CONNECTION_ID") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("HOMEFLOW_CONNECTION_ID: '{raw}' is not a valid id"))?,
            Err(_) => {
                let id = ConnectionId::new();
                tracing::info!(connection_id = %id, "HOMEFLOW_CONNECTION_ID not set; using a fresh id");
                id
            }
        };
        Ok(Self {
            patterns_path,
            connection_id,
        })
    }
}

/// Safety limits applied to owners who configured none.
pub fn default_safety_limits(performance_threshold: f64) -> Vec<SafetyLimit> {
    vec![
        SafetyLimit::change_type("security-changes", ChangeType::Security),
        SafetyLimit::change_type("access-changes", ChangeType::Access),
        SafetyLimit::performance("performance-impact", performance_threshold),
        SafetyLimit::action_count("action-count", 5.0),
    ]
}

pub struct App {
    connection_id: ConnectionId,
    pipeline: IngestPipeline,
    metrics: Arc<MetricsRecorder>,
    publisher: Arc<PublisherHandle>,
    scheduler: SchedulerHandle,
    batches: Arc<InMemoryBatchStore>,
    suggestions: Arc<InMemorySuggestionStore>,
}

impl App {
    /// Must be called from within a Tokio runtime (the scheduler is spawned).
    pub fn build(config: PipelineConfig, options: &RuntimeOptions) -> anyhow::Result<Self> {
        let (bus, dead_letters) = broker(&config)?;
        let publisher = Arc::new(
            StreamPublisher::new(bus, dead_letters, config.publisher.clone())
                .spawn()
                .context("failed to start stream publisher")?,
        );

        let metrics = Arc::new(MetricsRecorder::new(&config.metrics, Arc::new(InMemoryMetricsSink::new())));
        let pipeline = IngestPipeline::new(
            FilterEngine::new(config.filter.clone()),
            metrics.clone(),
            publisher.clone(),
        );

        let source = match &options.patterns_path {
            Some(path) => JsonFilePatternSource::load(path)?,
            None => {
                tracing::warn!("HOMEFLOW_PATTERNS_PATH not set; batches will find no pattern data");
                JsonFilePatternSource::default()
            }
        };

        let connections = Arc::new(InMemoryConnectionDirectory::new());
        for (connection_id, preferences) in source.connections() {
            connections.upsert(*connection_id, preferences.clone())?;
        }
        tracing::info!(connections = source.connections().len(), "loaded pattern data");

        let batches = Arc::new(InMemoryBatchStore::new());
        let suggestions = Arc::new(InMemorySuggestionStore::new());
        let limits = Arc::new(InMemorySafetyLimitStore::new(default_safety_limits(
            config.validator.performance_threshold,
        )));
        let backend = build_backend(&config.ai)?;
        let patterns: Arc<dyn PatternSource> = Arc::new(source);

        let deps = BatchDeps {
            connections,
            patterns,
            aggregator: ContextAggregator::new(config.context_lookback),
            generator: Arc::new(SuggestionGenerator::new(Arc::new(backend), config.ai.generation_budget())),
            validator: Arc::new(SuggestionValidator::new(config.validator.clone())),
            enforcer: Arc::new(SafetyLimitEnforcer::new(limits)),
            batches: batches.clone(),
            suggestions: suggestions.clone(),
        };
        let interval = config.batch.interval;
        let orchestrator = Arc::new(BatchOrchestrator::new(deps, config.batch));
        let scheduler = BatchScheduler::spawn(orchestrator, interval);

        Ok(Self {
            connection_id: options.connection_id,
            pipeline,
            metrics,
            publisher,
            scheduler,
            batches,
            suggestions,
        })
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Process one raw hub payload line. Blank lines are ignored.
    pub fn ingest_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Some(decision) = self.pipeline.ingest_raw(self.connection_id, line) {
            tracing::debug!(
                event_id = %decision.event_id,
                kept = decision.kept,
                rule_id = %decision.rule_id,
                reason = %decision.reason,
                "filter decision"
            );
        }
    }

    /// Stop scheduling, let in-flight batches finish, drain the publisher and
    /// flush the open metrics window.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;

        let publisher = self.publisher.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || publisher.shutdown()).await {
            tracing::error!(error = %e, "stream publisher shutdown failed");
        }
        self.metrics.flush_now();

        let stats = self.pipeline.processing_stats();
        let published = self.publisher.stats();
        let completed = self.batches.count_by_status(BatchStatus::Completed).unwrap_or(0);
        let failed = self.batches.count_by_status(BatchStatus::Failed).unwrap_or(0);
        tracing::info!(
            total_events = stats.total_events_processed,
            kept_events = stats.kept_events,
            filter_rate = stats.filter_rate,
            avg_processing_ms = stats.avg_processing_time,
            malformed = stats.malformed_events,
            rule_errors = stats.rule_errors,
            published = published.published,
            dead_lettered = published.dead_lettered,
            batches_completed = completed,
            batches_failed = failed,
            suggestions = self.suggestions.len(),
            "shutdown complete"
        );
    }
}

type Broker = (Arc<dyn EventBus<StreamRecord>>, Arc<dyn DeadLetterSink>);

#[cfg(feature = "redis")]
fn broker(config: &PipelineConfig) -> anyhow::Result<Broker> {
    use homeflow_infra::event_bus::{RedisDeadLetterSink, RedisStreamsBroker};

    match &config.redis_url {
        Some(url) => {
            let topic = config.publisher.topic.clone();
            let bus: Arc<dyn EventBus<StreamRecord>> =
                Arc::new(RedisStreamsBroker::new(url, topic.clone(), config.publisher.partitions)?);
            let dlq: Arc<dyn DeadLetterSink> = Arc::new(RedisDeadLetterSink::new(url, topic)?);
            tracing::info!(topic = %config.publisher.topic, "publishing to Redis Streams");
            Ok((bus, dlq))
        }
        None => Ok(in_memory_broker(config)),
    }
}

#[cfg(not(feature = "redis"))]
fn broker(config: &PipelineConfig) -> anyhow::Result<Broker> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but this build has no Redis support; using the in-memory broker");
    }
    Ok(in_memory_broker(config))
}

fn in_memory_broker(config: &PipelineConfig) -> Broker {
    tracing::info!(partitions = config.publisher.partitions, "publishing to the in-memory broker");
    let bus: Arc<dyn EventBus<StreamRecord>> = Arc::new(InMemoryPartitionedBus::new(config.publisher.partitions));
    let dlq: Arc<dyn DeadLetterSink> = Arc::new(InMemoryDeadLetterSink::new());
    (bus, dlq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeflow_ai::SafetyLimitSource;

    #[test]
    fn default_limits_cover_security_and_access() {
        let limits = default_safety_limits(50.0);
        let store = InMemorySafetyLimitStore::new(limits);
        let loaded = store.limits_for(ConnectionId::new()).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(loaded.iter().all(|l| l.approval_required));
    }

    #[tokio::test]
    async fn builds_and_ingests_without_external_services() {
        let options = RuntimeOptions {
            patterns_path: None,
            connection_id: ConnectionId::new(),
        };
        let app = App::build(PipelineConfig::default(), &options).unwrap();

        app.ingest_line(
            r#"{"event_type": "state_changed", "data": {"entity_id": "light.kitchen",
                "old_state": {"state": "off"}, "new_state": {"state": "on"}}}"#,
        );
        app.ingest_line("garbage");
        app.ingest_line("   ");

        let stats = app.pipeline.processing_stats();
        assert_eq!(stats.total_events_processed, 1);
        assert_eq!(stats.malformed_events, 1);

        app.shutdown().await;
    }
}
