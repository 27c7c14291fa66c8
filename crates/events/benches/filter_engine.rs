use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use homeflow_core::{ConnectionId, EntityId};
use homeflow_events::{Event, FilterConfig, FilterEngine, UserRule};

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap_or_default()
}

/// A mixed stream: chatty sensors, toggling lights, occasional locks.
fn workload(n: usize) -> Vec<Event> {
    let conn = ConnectionId::new();
    (0..n)
        .map(|i| {
            let (entity, old, new) = match i % 5 {
                0 => (format!("sensor.temp_{}", i % 50), "21.0".to_string(), format!("{:.2}", 21.0 + (i % 7) as f64 * 0.03)),
                1 => (format!("light.room_{}", i % 20), "off".to_string(), "on".to_string()),
                2 => ("sensor.router_uptime".to_string(), "1".to_string(), "2".to_string()),
                3 => (format!("switch.plug_{}", i % 10), "on".to_string(), "off".to_string()),
                _ => ("lock.front_door".to_string(), "locked".to_string(), "unlocked".to_string()),
            };
            Event::new(conn, EntityId::new(entity), "state_changed", at(i as i64 * 3))
                .with_states(Some(old), Some(new))
        })
        .collect()
}

fn engine() -> FilterEngine {
    FilterEngine::new(FilterConfig::default().with_user_rules(vec![
        UserRule::deny("mute-media", "media_player.*"),
        UserRule::allow("keep-garage", "cover.garage*"),
    ]))
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_engine");

    for size in [1_000usize, 10_000] {
        let events = workload(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("evaluate", size), &events, |b, events| {
            b.iter_batched(
                engine,
                |engine| {
                    for ev in events {
                        black_box(engine.evaluate(ev));
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Reports p99 single-event latency against the 100ms ingestion budget.
fn bench_p99(c: &mut Criterion) {
    let events = workload(20_000);
    let engine = engine();
    let mut samples: Vec<Duration> = events
        .iter()
        .map(|ev| {
            let start = Instant::now();
            black_box(engine.evaluate(ev));
            start.elapsed()
        })
        .collect();
    samples.sort();
    let p99 = samples[samples.len() * 99 / 100];
    assert!(p99 < Duration::from_millis(100), "p99 {p99:?} exceeds budget");
    println!("filter_engine p99 per-event latency: {p99:?}");

    c.bench_function("filter_engine/single_event", |b| {
        let ev = &events[0];
        b.iter(|| black_box(engine.evaluate(ev)));
    });
}

criterion_group!(benches, bench_evaluate, bench_p99);
criterion_main!(benches);
