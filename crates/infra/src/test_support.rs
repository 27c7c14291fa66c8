//! Shared doubles for infra tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};

use homeflow_ai::{
    AiError, BehaviorPattern, Completion, ContextAggregator, GenerationRequest, PatternKind, PatternSource,
    SafetyLimit, SafetyLimitEnforcer, SuggestionBackend, SuggestionGenerator, SuggestionValidator, UserPreferences,
};
use homeflow_core::{ConnectionId, EntityId};

use crate::batch::BatchDeps;
use crate::store::{
    InMemoryBatchStore, InMemoryConnectionDirectory, InMemorySafetyLimitStore, InMemorySuggestionStore,
};

pub const KITCHEN_AT_DUSK: &str = r#"{"title": "Kitchen lights at dusk", "safety_critical": false,
 "automation": {"alias": "Kitchen dusk", "triggers": [{"platform": "sun", "event": "sunset"}],
  "actions": [{"service": "light.turn_on", "entity_ids": ["light.kitchen"]}]}}"#;

pub const UNLOCK_FRONT_DOOR: &str = r#"{"title": "Unlock on arrival", "safety_critical": true,
 "automation": {"alias": "Arrival unlock", "triggers": [{"platform": "sun", "event": "sunset"}],
  "actions": [{"service": "lock.unlock", "entity_ids": ["lock.front_door"]}]}}"#;

/// Replies with `reply` after `delay`, every time.
pub struct ScriptedBackend {
    pub reply: &'static str,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn replying(reply: &'static str) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(reply: &'static str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(reply)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SuggestionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _: &GenerationRequest) -> Result<Completion, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Completion {
            backend: "scripted".to_string(),
            text: self.reply.to_string(),
        })
    }
}

/// Patterns keyed by connection. Connections listed in `panics_for` panic.
#[derive(Default)]
pub struct FixedPatterns {
    pub patterns: HashMap<ConnectionId, Vec<BehaviorPattern>>,
    pub panics_for: Vec<ConnectionId>,
    pub fails_for: Vec<ConnectionId>,
}

impl PatternSource for FixedPatterns {
    fn patterns_for(&self, connection_id: ConnectionId) -> Result<Vec<BehaviorPattern>, AiError> {
        if self.panics_for.contains(&connection_id) {
            panic!("pattern store corrupted for {connection_id}");
        }
        if self.fails_for.contains(&connection_id) {
            return Err(AiError::PatternSource("pattern store unreachable".to_string()));
        }
        Ok(self.patterns.get(&connection_id).cloned().unwrap_or_default())
    }
}

pub fn pattern(entity: &str) -> BehaviorPattern {
    BehaviorPattern {
        kind: PatternKind::TimeOfDay,
        entities: vec![EntityId::new(entity)],
        description: format!("{entity} is switched on around sunset"),
        occurrences: 12,
        confidence: 0.9,
        typical_time: NaiveTime::from_hms_opt(19, 30, 0),
        observed_at: Utc::now() - chrono::Duration::hours(2),
    }
}

/// `n` single-pattern contexts: one per domain so none get merged.
pub fn patterns_in_domains(n: usize) -> Vec<BehaviorPattern> {
    let mut out = vec![pattern("light.kitchen")];
    out.extend((1..n).map(|i| pattern(&format!("domain{i}.device"))));
    out
}

pub struct Fixture {
    pub connections: Arc<InMemoryConnectionDirectory>,
    pub batches: Arc<InMemoryBatchStore>,
    pub suggestions: Arc<InMemorySuggestionStore>,
    pub deps: BatchDeps,
}

pub fn fixture(
    patterns: FixedPatterns,
    backend: Arc<dyn SuggestionBackend>,
    timeout: Duration,
) -> Fixture {
    let connections = Arc::new(InMemoryConnectionDirectory::new());
    for connection_id in patterns
        .patterns
        .keys()
        .chain(patterns.panics_for.iter())
        .chain(patterns.fails_for.iter())
    {
        connections
            .upsert(*connection_id, UserPreferences::default())
            .expect("upsert connection");
    }
    let batches = Arc::new(InMemoryBatchStore::new());
    let suggestions = Arc::new(InMemorySuggestionStore::new());
    let limits = Arc::new(InMemorySafetyLimitStore::new(vec![SafetyLimit::action_count("max-actions", 5.0)]));

    let deps = BatchDeps {
        connections: connections.clone(),
        patterns: Arc::new(patterns),
        aggregator: ContextAggregator::default(),
        generator: Arc::new(SuggestionGenerator::new(backend, timeout)),
        validator: Arc::new(SuggestionValidator::default()),
        enforcer: Arc::new(SafetyLimitEnforcer::new(limits)),
        batches: batches.clone(),
        suggestions: suggestions.clone(),
    };

    Fixture {
        connections,
        batches,
        suggestions,
        deps,
    }
}
