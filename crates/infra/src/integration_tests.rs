//! End-to-end checks over in-memory collaborators.
//!
//! Ingestion: raw payload → filter → metrics → publisher → broker.
//! Batches: scheduler/trigger → contexts → generator → validator → gate → store.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use homeflow_ai::{
        AiError, Completion, GenerationRequest, IssueSeverity, SuggestionBackend, SuggestionStatus, ValidationStage,
    };
    use homeflow_core::{ConnectionId, EntityId};
    use homeflow_events::{Event, FilterConfig, FilterEngine, InMemoryPartitionedBus, StreamRecord};

    use crate::batch::{BatchConfig, BatchOrchestrator, BatchStatus, TriggerOutcome};
    use crate::ingest::IngestPipeline;
    use crate::metrics::{InMemoryMetricsSink, MetricsConfig, MetricsRecorder};
    use crate::store::{BatchStore, SuggestionStore};
    use crate::stream::{InMemoryDeadLetterSink, PublisherConfig, PublisherHandle, StreamPublisher};
    use crate::test_support::{
        FixedPatterns, KITCHEN_AT_DUSK, ScriptedBackend, UNLOCK_FRONT_DOOR, fixture, pattern, patterns_in_domains,
    };

    fn ingestion(
        bus: Arc<InMemoryPartitionedBus<StreamRecord>>,
    ) -> (IngestPipeline, Arc<PublisherHandle>, Arc<InMemoryMetricsSink>) {
        let publisher = Arc::new(
            StreamPublisher::new(
                bus,
                Arc::new(InMemoryDeadLetterSink::new()),
                PublisherConfig::default().with_workers(4),
            )
            .spawn()
            .unwrap(),
        );
        let sink = Arc::new(InMemoryMetricsSink::new());
        let metrics = Arc::new(MetricsRecorder::new(&MetricsConfig::default(), sink.clone()));
        let engine = FilterEngine::new(FilterConfig::default().with_cooldown(Duration::from_secs(1)));
        (IngestPipeline::new(engine, metrics, publisher.clone()), publisher, sink)
    }

    #[test]
    fn burst_on_one_entity_is_mostly_suppressed_and_every_kept_event_is_published() {
        let bus = Arc::new(InMemoryPartitionedBus::new(12));
        let (pipeline, publisher, _) = ingestion(bus.clone());
        let connection = ConnectionId::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();

        let mut kept = 0u64;
        for i in 0..1000i64 {
            let (old, new) = if i % 2 == 0 { ("off", "on") } else { ("on", "off") };
            let event = Event::new(
                connection,
                EntityId::new("light.hallway"),
                "state_changed",
                base + chrono::Duration::microseconds(i * 500),
            )
            .with_states(Some(old.to_string()), Some(new.to_string()));

            let decision = pipeline.ingest(event);
            if decision.kept {
                kept += 1;
            }
        }
        publisher.shutdown();

        let stats = pipeline.processing_stats();
        assert_eq!(stats.total_events_processed, 1000);
        assert_eq!(stats.kept_events as u64, kept);
        assert!(stats.filter_rate >= 0.60, "filter rate {}", stats.filter_rate);
        assert!((0.0..=1.0).contains(&stats.filter_rate));

        assert_eq!(publisher.stats().published, kept);
        assert_eq!(bus.records_for_key("light.hallway").len() as u64, kept);
    }

    #[test]
    fn safety_relevant_burst_is_never_suppressed() {
        let bus = Arc::new(InMemoryPartitionedBus::new(4));
        let (pipeline, publisher, _) = ingestion(bus.clone());
        let base = Utc::now();

        for i in 0..20i64 {
            let (old, new) = if i % 2 == 0 { ("locked", "unlocked") } else { ("unlocked", "locked") };
            let event = Event::new(
                ConnectionId::new(),
                EntityId::new("lock.front_door"),
                "state_changed",
                base + chrono::Duration::milliseconds(i),
            )
            .with_states(Some(old.to_string()), Some(new.to_string()));
            assert!(pipeline.ingest(event).kept);
        }
        publisher.shutdown();

        assert_eq!(bus.records_for_key("lock.front_door").len(), 20);
    }

    #[tokio::test]
    async fn failing_connection_does_not_stop_the_others() {
        let healthy = [ConnectionId::new(), ConnectionId::new()];
        let broken = ConnectionId::new();
        let patterns = FixedPatterns {
            patterns: HashMap::from([
                (healthy[0], patterns_in_domains(2)),
                (healthy[1], patterns_in_domains(3)),
            ]),
            panics_for: vec![broken],
            ..FixedPatterns::default()
        };
        let fx = fixture(
            patterns,
            Arc::new(ScriptedBackend::replying(KITCHEN_AT_DUSK)),
            Duration::from_secs(5),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(fx.deps, BatchConfig::default()));

        let record = orchestrator.run_now().await.unwrap();

        assert_eq!(record.status, BatchStatus::Completed);
        assert!(record.error_count >= 1);
        assert_eq!(fx.suggestions.list_for_connection(healthy[0]).unwrap().len(), 2);
        assert_eq!(fx.suggestions.list_for_connection(healthy[1]).unwrap().len(), 3);
        assert!(fx.suggestions.list_for_connection(broken).unwrap().is_empty());
        assert_eq!(
            record.generated_count + record.error_count + record.empty_count,
            record.contexts_attempted
        );
    }

    /// Hangs on prompts about climate entities, answers everything else.
    struct HangsOnClimate;

    #[async_trait]
    impl SuggestionBackend for HangsOnClimate {
        fn name(&self) -> &str {
            "selective"
        }

        async fn complete(&self, request: &GenerationRequest) -> Result<Completion, AiError> {
            if request.prompt.contains("climate.") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(Completion {
                backend: "selective".to_string(),
                text: KITCHEN_AT_DUSK.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn timed_out_context_is_empty_and_the_batch_continues() {
        let c = ConnectionId::new();
        let patterns = FixedPatterns {
            patterns: HashMap::from([(c, vec![pattern("light.kitchen"), pattern("climate.living_room")])]),
            ..FixedPatterns::default()
        };
        let fx = fixture(patterns, Arc::new(HangsOnClimate), Duration::from_millis(50));
        let orchestrator = Arc::new(BatchOrchestrator::new(fx.deps, BatchConfig::default()));

        let record = orchestrator.run_now().await.unwrap();

        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.contexts_attempted, 2);
        assert_eq!(record.generated_count, 1);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.empty_count, 1);
        assert_eq!(fx.suggestions.list_for_batch(record.batch_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn security_failure_zeroes_confidence_and_requires_approval() {
        let c = ConnectionId::new();
        let patterns = FixedPatterns {
            patterns: HashMap::from([(c, vec![pattern("lock.front_door")])]),
            ..FixedPatterns::default()
        };
        let fx = fixture(
            patterns,
            Arc::new(ScriptedBackend::replying(UNLOCK_FRONT_DOOR)),
            Duration::from_secs(5),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(fx.deps, BatchConfig::default()));

        let record = orchestrator.run_now().await.unwrap();
        assert_eq!(record.generated_count, 1);

        let stored = fx.suggestions.list_for_connection(c).unwrap();
        let suggestion = &stored[0];
        let report = suggestion.validation.as_ref().unwrap();

        assert!(!report.valid);
        assert_eq!(report.confidence_score, 0.0);
        assert_eq!(suggestion.confidence, 0.0);
        assert!(!report.stage(ValidationStage::Security).unwrap().passed);
        assert!(report.stage(ValidationStage::Syntax).unwrap().passed);
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.stage == ValidationStage::Security && i.severity == IssueSeverity::Error)
        );
        assert!(suggestion.approval_required());
        assert_eq!(suggestion.status(), SuggestionStatus::Pending);

        // Invalid suggestions stay in the audit trail but cannot be approved.
        assert!(fx.suggestions.approve(suggestion.id).is_err());
    }

    #[tokio::test]
    async fn trigger_at_capacity_is_rejected_without_a_record() {
        let c = ConnectionId::new();
        let patterns = FixedPatterns {
            patterns: HashMap::from([(c, patterns_in_domains(1))]),
            ..FixedPatterns::default()
        };
        let fx = fixture(
            patterns,
            Arc::new(ScriptedBackend::slow(KITCHEN_AT_DUSK, Duration::from_millis(200))),
            Duration::from_secs(5),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            fx.deps,
            BatchConfig::default().with_max_concurrent(1),
        ));

        let TriggerOutcome::Accepted(running) = orchestrator.trigger() else {
            panic!("first trigger should be accepted");
        };
        let second = orchestrator.trigger();

        assert!(matches!(second, TriggerOutcome::Rejected { .. }));
        assert_eq!(fx.batches.list().unwrap().len(), 1);

        let record = running.wait().await.unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(fx.batches.list().unwrap().len(), 1);
        assert!(orchestrator.trigger().is_accepted());
    }

    #[tokio::test]
    async fn running_batches_never_exceed_the_limit() {
        let patterns = FixedPatterns {
            patterns: (0..4).map(|_| (ConnectionId::new(), patterns_in_domains(2))).collect(),
            ..FixedPatterns::default()
        };
        let fx = fixture(
            patterns,
            Arc::new(ScriptedBackend::slow(KITCHEN_AT_DUSK, Duration::from_millis(50))),
            Duration::from_secs(5),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            fx.deps,
            BatchConfig::default().with_max_concurrent(2),
        ));

        let outcomes: Vec<TriggerOutcome> = (0..5).map(|_| orchestrator.trigger()).collect();
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();

        assert_eq!(accepted, 2);
        assert!(fx.batches.count_by_status(BatchStatus::Running).unwrap() <= 2);
        assert!(orchestrator.running() <= 2);

        for outcome in outcomes {
            if let TriggerOutcome::Accepted(handle) = outcome {
                let record = handle.wait().await.unwrap();
                assert_eq!(record.status, BatchStatus::Completed);
            }
        }
        assert_eq!(fx.batches.count_by_status(BatchStatus::Completed).unwrap(), 2);
        assert_eq!(orchestrator.running(), 0);
    }
}
