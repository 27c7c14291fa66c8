//! Ingestion path: parse → filter → record → hand off.
//!
//! Everything up to the hand-off runs on the caller's thread. Publishing is
//! queued on the [`PublisherHandle`] so broker latency never reaches here.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use homeflow_core::ConnectionId;
use homeflow_events::{Event, FilterDecision, FilterEngine};

use crate::metrics::{MetricsRecorder, ProcessingStats};
use crate::stream::PublisherHandle;

pub struct IngestPipeline {
    engine: FilterEngine,
    metrics: Arc<MetricsRecorder>,
    publisher: Arc<PublisherHandle>,
}

impl IngestPipeline {
    pub fn new(engine: FilterEngine, metrics: Arc<MetricsRecorder>, publisher: Arc<PublisherHandle>) -> Self {
        Self {
            engine,
            metrics,
            publisher,
        }
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Parse and process one raw hub payload. Malformed payloads are logged,
    /// counted and dropped; they never produce a decision.
    pub fn ingest_raw(&self, connection_id: ConnectionId, raw: &str) -> Option<FilterDecision> {
        match Event::from_hub_payload(connection_id, raw, Utc::now()) {
            Ok(event) => Some(self.ingest(event)),
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "discarding malformed hub payload");
                self.metrics.record_malformed();
                None
            }
        }
    }

    /// Filter one event, record it, and queue it for publishing if kept.
    pub fn ingest(&self, event: Event) -> FilterDecision {
        let started = Instant::now();
        let decision = self.engine.evaluate(&event);
        self.metrics.record(&decision, started.elapsed());

        if decision.kept {
            if let Err(e) = self.publisher.submit(event) {
                // Only after shutdown; the event is lost.
                tracing::error!(
                    event_id = %decision.event_id,
                    error = %e,
                    "kept event could not be queued for publishing"
                );
            }
        }
        decision
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        self.metrics.get_processing_stats()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use homeflow_events::{FilterConfig, InMemoryPartitionedBus, StreamRecord};

    use super::*;
    use crate::metrics::{InMemoryMetricsSink, MetricsConfig};
    use crate::stream::{InMemoryDeadLetterSink, PublisherConfig, StreamPublisher};

    fn pipeline(bus: Arc<InMemoryPartitionedBus<StreamRecord>>) -> (IngestPipeline, Arc<PublisherHandle>) {
        let publisher = Arc::new(
            StreamPublisher::new(
                bus,
                Arc::new(InMemoryDeadLetterSink::new()),
                PublisherConfig::default().with_workers(2),
            )
            .spawn()
            .unwrap(),
        );
        let metrics = Arc::new(MetricsRecorder::new(
            &MetricsConfig::default(),
            Arc::new(InMemoryMetricsSink::new()),
        ));
        let engine = FilterEngine::new(FilterConfig::default().with_cooldown(Duration::from_secs(1)));
        (IngestPipeline::new(engine, metrics, publisher.clone()), publisher)
    }

    fn payload(entity: &str, old: &str, new: &str) -> String {
        serde_json::json!({
            "event_type": "state_changed",
            "data": {
                "entity_id": entity,
                "old_state": {"state": old, "attributes": {}},
                "new_state": {"state": new, "attributes": {}}
            }
        })
        .to_string()
    }

    #[test]
    fn kept_events_reach_the_broker() {
        let bus = Arc::new(InMemoryPartitionedBus::new(4));
        let (pipeline, publisher) = pipeline(bus.clone());

        let first = pipeline.ingest_raw(ConnectionId::new(), &payload("light.kitchen", "off", "on"));
        let second = pipeline.ingest_raw(ConnectionId::new(), &payload("switch.fan", "on", "off"));
        publisher.shutdown();

        assert!(first.unwrap().kept);
        assert!(second.unwrap().kept);
        assert_eq!(bus.records_for_key("light.kitchen").len(), 1);
        assert_eq!(bus.records_for_key("switch.fan").len(), 1);
        assert_eq!(publisher.stats().published, 2);
    }

    #[test]
    fn malformed_payloads_are_counted_not_decided() {
        let bus = Arc::new(InMemoryPartitionedBus::new(4));
        let (pipeline, publisher) = pipeline(bus.clone());

        assert!(pipeline.ingest_raw(ConnectionId::new(), "not json").is_none());
        assert!(pipeline.ingest_raw(ConnectionId::new(), r#"{"event_type": "state_changed", "data": {}}"#).is_none());
        publisher.shutdown();

        let stats = pipeline.processing_stats();
        assert_eq!(stats.malformed_events, 2);
        assert_eq!(stats.total_events_processed, 0);
        assert!(bus.is_empty());
    }
}
