use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use homeflow_core::{ConnectionId, EventId};
use homeflow_events::{FilterConfig, FilterDecision, FilterEngine, InMemoryPartitionedBus, StreamRecord};
use homeflow_infra::metrics::{InMemoryMetricsSink, MetricsConfig, MetricsRecorder};
use homeflow_infra::stream::{InMemoryDeadLetterSink, PublisherConfig, StreamPublisher};
use homeflow_infra::IngestPipeline;

const PER_THREAD: usize = 10_000;

fn bench_metrics_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_recorder");

    for threads in [1usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::new("record", threads), &threads, |b, &threads| {
            let recorder = Arc::new(MetricsRecorder::new(
                &MetricsConfig::default(),
                Arc::new(InMemoryMetricsSink::new()),
            ));
            let kept = FilterDecision::keep(EventId::new(), "default", "no rule matched");
            let dropped = FilterDecision::discard(EventId::new(), "frequency", "duplicate");

            b.iter(|| {
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for i in 0..PER_THREAD {
                                let d = if i % 3 == 0 { &kept } else { &dropped };
                                recorder.record(d, Duration::from_micros(40));
                            }
                        });
                    }
                });
                black_box(recorder.get_processing_stats());
            });
        });
    }

    group.finish();
}

fn payload(i: usize) -> String {
    serde_json::json!({
        "event_type": "state_changed",
        "data": {
            "entity_id": format!("light.room_{}", i % 32),
            "old_state": {"state": "off", "attributes": {}},
            "new_state": {"state": if i % 2 == 0 { "on" } else { "off" }, "attributes": {"brightness": i % 255}}
        }
    })
    .to_string()
}

fn bench_ingest_raw(c: &mut Criterion) {
    let payloads: Vec<String> = (0..5_000).map(payload).collect();
    let bus: Arc<InMemoryPartitionedBus<StreamRecord>> = Arc::new(InMemoryPartitionedBus::new(12));
    let publisher = match StreamPublisher::new(
        bus,
        Arc::new(InMemoryDeadLetterSink::new()),
        PublisherConfig::default(),
    )
    .spawn()
    {
        Ok(p) => Arc::new(p),
        Err(e) => panic!("cannot start publisher: {e}"),
    };
    let metrics = Arc::new(MetricsRecorder::new(
        &MetricsConfig::default(),
        Arc::new(InMemoryMetricsSink::new()),
    ));
    let pipeline = IngestPipeline::new(FilterEngine::new(FilterConfig::default()), metrics, publisher.clone());
    let connection = ConnectionId::new();

    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(payloads.len() as u64));
    group.bench_function("ingest_raw", |b| {
        b.iter(|| {
            for raw in &payloads {
                black_box(pipeline.ingest_raw(connection, raw));
            }
        });
    });
    group.finish();

    publisher.shutdown();
}

criterion_group!(benches, bench_metrics_contention, bench_ingest_raw);
criterion_main!(benches);
