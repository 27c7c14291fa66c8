//! Asynchronous publishing of kept events.
//!
//! Ingestion hands kept events to [`PublisherHandle::submit`], which only
//! enqueues. A fixed pool of worker threads serializes and publishes them.
//! Each key (entity id) always maps to the same worker, and a worker handles
//! one message at a time including its retries, so per-entity order is
//! preserved end to end.
//!
//! Worker queues are bounded. When a queue is full the event goes straight to
//! the dead-letter sink instead of blocking the caller. Every accepted event
//! ends up published or dead-lettered: `shutdown` closes the handle before
//! telling workers to stop, so nothing is queued behind the stop command.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use homeflow_events::{Event, EventBus, StreamRecord, partition_for};

use super::retry::RetryPolicy;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub topic: String,
    pub partitions: u32,
    pub workers: usize,
    /// Events each worker may hold before overflow is dead-lettered.
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Thread name prefix for logging.
    pub name: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "homeflow.events".to_string(),
            partitions: 12,
            workers: 4,
            queue_capacity: 10_000,
            retry: RetryPolicy::default(),
            name: "stream-publisher".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A message that exhausted its retries or was rejected outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub topic: String,
    pub record: StreamRecord,
    pub error: String,
    /// Publish attempts made, including the first. Zero for queue overflow.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), StoreError> {
        self.letters.lock().map_err(|_| StoreError::Poisoned)?.push(letter);
        Ok(())
    }
}

/// Publisher runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub submitted: u64,
    pub published: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Dead-lettered because a worker queue was full. Included in
    /// `dead_lettered`.
    pub overflowed: u64,
    pub serialization_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    published: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    overflowed: AtomicU64,
    serialization_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            overflowed: self.overflowed.load(Ordering::SeqCst),
            serialization_failures: self.serialization_failures.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("publisher is shut down")]
    Closed,
}

enum Command {
    Publish(Box<Event>),
    Shutdown,
}

type SharedBus = Arc<dyn EventBus<StreamRecord>>;

pub struct StreamPublisher {
    bus: SharedBus,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: PublisherConfig,
}

impl StreamPublisher {
    pub fn new(bus: SharedBus, dead_letters: Arc<dyn DeadLetterSink>, config: PublisherConfig) -> Self {
        Self {
            bus,
            dead_letters,
            config,
        }
    }

    /// Start the worker threads.
    pub fn spawn(self) -> std::io::Result<PublisherHandle> {
        let workers = self.config.workers.max(1);
        let capacity = self.config.queue_capacity.max(1);
        let outlet = Arc::new(DeadLetterOutlet {
            sink: self.dead_letters,
            topic: self.config.topic.clone(),
            counters: Arc::new(Counters::default()),
        });
        let mut senders = Vec::with_capacity(workers);
        let mut joins = Vec::with_capacity(workers);

        for idx in 0..workers {
            let (tx, rx) = mpsc::sync_channel::<Command>(capacity);
            let worker = Worker {
                bus: self.bus.clone(),
                outlet: outlet.clone(),
                retry: self.config.retry.clone(),
            };
            let join = thread::Builder::new()
                .name(format!("{}-{idx}", self.config.name))
                .spawn(move || worker.run(rx))?;
            senders.push(tx);
            joins.push(join);
        }

        info!(
            publisher = %self.config.name,
            topic = %self.config.topic,
            workers,
            queue_capacity = capacity,
            "stream publisher started"
        );

        Ok(PublisherHandle {
            senders,
            closed: RwLock::new(false),
            joins: Mutex::new(joins),
            outlet,
        })
    }
}

/// Handle to a running publisher. Shared by ingestion threads.
pub struct PublisherHandle {
    senders: Vec<mpsc::SyncSender<Command>>,
    /// Held shared while enqueueing, exclusively while shutting down.
    closed: RwLock<bool>,
    joins: Mutex<Vec<thread::JoinHandle<()>>>,
    outlet: Arc<DeadLetterOutlet>,
}

impl core::fmt::Debug for PublisherHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PublisherHandle")
            .field("workers", &self.senders.len())
            .field("stats", &self.outlet.counters.snapshot())
            .finish()
    }
}

impl PublisherHandle {
    /// Enqueue a kept event. Never blocks on the broker; a full queue
    /// dead-letters the event and still returns `Ok`.
    pub fn submit(&self, event: Event) -> Result<(), SubmitError> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(SubmitError::Closed);
        }

        let idx = partition_for(event.entity_id().as_str(), self.senders.len() as u32) as usize;
        match self.senders[idx].try_send(Command::Publish(Box::new(event))) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Publish(event))) => {
                self.outlet.counters.overflowed.fetch_add(1, Ordering::SeqCst);
                match StreamRecord::from_event(&event) {
                    Ok(record) => self.outlet.dead_letter(record, "publish queue full".to_string(), 0),
                    Err(e) => self.outlet.serialization_failed(&event, &e),
                }
            }
            Err(_) => return Err(SubmitError::Closed),
        }
        self.outlet.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stats(&self) -> PublisherStats {
        self.outlet.counters.snapshot()
    }

    /// Publish everything already accepted and stop the workers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            if !*closed {
                *closed = true;
                for tx in &self.senders {
                    let _ = tx.send(Command::Shutdown);
                }
            }
        }
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for j in joins {
            if j.join().is_err() {
                error!("stream publisher worker panicked");
            }
        }
    }
}

/// Dead-letter sink plus the counters shared by the handle and workers.
struct DeadLetterOutlet {
    sink: Arc<dyn DeadLetterSink>,
    topic: String,
    counters: Arc<Counters>,
}

impl DeadLetterOutlet {
    fn dead_letter(&self, record: StreamRecord, error: String, attempts: u32) {
        self.counters.dead_lettered.fetch_add(1, Ordering::SeqCst);
        warn!(
            topic = %self.topic,
            key = record.key(),
            event_id = %record.event_id(),
            attempts,
            error = %error,
            "publish failed, dead-lettering"
        );
        let letter = DeadLetter {
            topic: self.topic.clone(),
            record,
            error,
            attempts,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.sink.dead_letter(letter) {
            error!(error = %e, "failed to write dead letter");
        }
    }

    fn serialization_failed(&self, event: &Event, error: &dyn std::fmt::Display) {
        self.counters.serialization_failures.fetch_add(1, Ordering::SeqCst);
        warn!(event_id = %event.id(), error = %error, "failed to serialize event");
    }
}

struct Worker {
    bus: SharedBus,
    outlet: Arc<DeadLetterOutlet>,
    retry: RetryPolicy,
}

impl Worker {
    fn run(self, rx: mpsc::Receiver<Command>) {
        while let Ok(cmd) = rx.recv() {
            match cmd {
                Command::Publish(event) => self.publish(&event),
                Command::Shutdown => break,
            }
        }
        debug!(topic = %self.outlet.topic, "stream publisher worker stopped");
    }

    fn publish(&self, event: &Event) {
        let counters = &self.outlet.counters;
        let record = match StreamRecord::from_event(event) {
            Ok(r) => r,
            Err(e) => {
                self.outlet.serialization_failed(event, &e);
                return;
            }
        };

        let mut retries = 0u32;
        loop {
            match self.bus.publish(record.key(), record.clone()) {
                Ok(()) => {
                    counters.published.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Err(e) if e.is_transient() && self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.backoff(retries);
                    debug!(
                        key = record.key(),
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying publish"
                    );
                    counters.retried.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(delay);
                }
                Err(e) => {
                    self.outlet.dead_letter(record, e.to_string(), retries + 1);
                    return;
                }
            }
        }
    }
}
