//! Ingestion-path event filter.
//!
//! Rules run in a fixed priority order:
//!
//! 1. frequency / cooldown suppression per entity
//! 2. pattern-based noise suppression
//! 3. user-defined allow/deny rules
//!
//! The first rule that returns `Keep` or `Drop` decides; if every rule
//! returns `Continue` the event is kept.
//!
//! ## Fail open
//!
//! A rule that errors or panics, or a poisoned cache shard, never drops an
//! event: the event is kept with rule id `fail_open`, a warning is logged, and
//! `rule_errors` is incremented. Approval enforcement in `homeflow-ai` fails
//! the other way (closed); the two policies are deliberately different.

pub mod cache;
pub mod rules;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use homeflow_core::{EntityId, Glob};

use crate::bus::partition_for;
use crate::decision::FilterDecision;
use crate::event::Event;

pub use cache::{EntityRecord, RecentStateCache};
pub use rules::{FrequencyRule, NoiseRule, UserRule, UserRuleAction, UserRuleSet};

/// Rule id recorded when no rule matched.
pub const DEFAULT_RULE_ID: &str = "default";
/// Rule id recorded when evaluation failed and the event was kept anyway.
pub const FAIL_OPEN_RULE_ID: &str = "fail_open";

/// What a single rule decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Keep { reason: String },
    Drop { reason: String },
    /// No opinion; ask the next rule.
    Continue,
}

impl RuleOutcome {
    pub fn keep(reason: impl Into<String>) -> Self {
        Self::Keep {
            reason: reason.into(),
        }
    }

    pub fn drop(reason: impl Into<String>) -> Self {
        Self::Drop {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule '{rule}' failed: {message}")]
    Evaluation { rule: String, message: String },

    #[error("rule '{0}' panicked")]
    Panicked(String),

    #[error("recent-state cache shard poisoned")]
    CachePoisoned,
}

impl RuleError {
    pub fn evaluation(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Per-event view handed to each rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// What the filter last kept for this entity, if cached.
    pub recent: Option<&'a EntityRecord>,
    /// Safety-relevant events must not be suppressed as noise or repeats.
    pub safety_relevant: bool,
}

/// A single filter rule.
///
/// Rules are pure apart from reading the recent-state view; the engine owns
/// cache updates.
pub trait FilterRule: Send + Sync {
    fn id(&self) -> &str;

    fn evaluate(&self, event: &Event, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError>;
}

/// Filter engine configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub cooldown: Duration,
    /// Kept state changes allowed per entity per cooldown window.
    pub max_changes_per_cooldown: u32,
    pub cache_capacity: usize,
    pub cache_shards: usize,
    pub noise_patterns: Vec<String>,
    pub numeric_jitter: f64,
    /// Entity domains that are never suppressed as noise/repeats.
    pub safety_domains: Vec<String>,
    /// `binary_sensor` device classes that are never suppressed.
    pub safety_device_classes: Vec<String>,
    pub user_rules: Vec<UserRule>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(1000),
            max_changes_per_cooldown: 3,
            cache_capacity: 10_000,
            cache_shards: 16,
            noise_patterns: vec![
                "sensor.*_uptime".to_string(),
                "sensor.*_last_boot".to_string(),
                "sensor.*_signal_strength".to_string(),
            ],
            numeric_jitter: 0.1,
            safety_domains: vec![
                "lock".to_string(),
                "alarm_control_panel".to_string(),
                "siren".to_string(),
            ],
            safety_device_classes: vec![
                "smoke".to_string(),
                "gas".to_string(),
                "carbon_monoxide".to_string(),
                "moisture".to_string(),
                "safety".to_string(),
            ],
            user_rules: Vec::new(),
        }
    }
}

impl FilterConfig {
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_user_rules(mut self, rules: Vec<UserRule>) -> Self {
        self.user_rules = rules;
        self
    }

    pub fn with_numeric_jitter(mut self, jitter: f64) -> Self {
        self.numeric_jitter = jitter;
        self
    }

    fn chrono_cooldown(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX)
    }

    /// The built-in rule chain in priority order.
    pub fn default_rules(&self) -> Vec<Box<dyn FilterRule>> {
        vec![
            Box::new(FrequencyRule::new(
                self.chrono_cooldown(),
                self.max_changes_per_cooldown,
            )),
            Box::new(NoiseRule::new(
                self.noise_patterns.iter().map(|p| Glob::new(p.as_str())).collect(),
                self.numeric_jitter,
            )),
            Box::new(UserRuleSet::new(self.user_rules.clone())),
        ]
    }
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub evaluated: u64,
    pub kept: u64,
    pub rule_errors: u64,
}

/// The filter engine. Shareable across ingestion threads.
pub struct FilterEngine {
    rules: Vec<Box<dyn FilterRule>>,
    shards: Vec<Mutex<RecentStateCache>>,
    cooldown: chrono::Duration,
    safety_domains: Vec<String>,
    safety_device_classes: Vec<String>,
    evaluated: AtomicU64,
    kept: AtomicU64,
    rule_errors: AtomicU64,
}

impl core::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("rules", &self.rules.iter().map(|r| r.id()).collect::<Vec<_>>())
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Self {
        let rules = config.default_rules();
        Self::with_rules(config, rules)
    }

    /// Build an engine with a custom rule chain (evaluated in the given order).
    pub fn with_rules(config: FilterConfig, rules: Vec<Box<dyn FilterRule>>) -> Self {
        let shard_count = config.cache_shards.max(1);
        let per_shard = config.cache_capacity.div_ceil(shard_count).max(1);

        Self {
            rules,
            shards: (0..shard_count)
                .map(|_| Mutex::new(RecentStateCache::new(per_shard)))
                .collect(),
            cooldown: config.chrono_cooldown(),
            safety_domains: config.safety_domains,
            safety_device_classes: config.safety_device_classes,
            evaluated: AtomicU64::new(0),
            kept: AtomicU64::new(0),
            rule_errors: AtomicU64::new(0),
        }
    }

    pub fn is_safety_relevant(&self, event: &Event) -> bool {
        let domain = event.entity_id().domain();
        if self.safety_domains.iter().any(|d| d == domain) {
            return true;
        }
        domain == "binary_sensor"
            && event
                .device_class()
                .is_some_and(|c| self.safety_device_classes.iter().any(|s| s == c))
    }

    fn shard_for(&self, entity: &EntityId) -> &Mutex<RecentStateCache> {
        let idx = partition_for(entity.as_str(), self.shards.len() as u32) as usize;
        &self.shards[idx]
    }

    /// Decide whether `event` is kept. Always returns exactly one decision.
    pub fn evaluate(&self, event: &Event) -> FilterDecision {
        self.evaluated.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard_for(event.entity_id());
        let mut cache = match shard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.clear();
                shard.clear_poison();
                drop(guard);
                return self.fail_open(event, RuleError::CachePoisoned);
            }
        };

        let ctx = RuleContext {
            recent: cache.get(event.entity_id()),
            safety_relevant: self.is_safety_relevant(event),
        };

        let mut verdict: Option<FilterDecision> = None;
        for rule in &self.rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(event, &ctx)))
                .unwrap_or_else(|_| Err(RuleError::Panicked(rule.id().to_string())));

            match outcome {
                Ok(RuleOutcome::Continue) => continue,
                Ok(RuleOutcome::Keep { reason }) => {
                    verdict = Some(FilterDecision::keep(event.id(), rule.id(), reason));
                    break;
                }
                Ok(RuleOutcome::Drop { reason }) => {
                    verdict = Some(FilterDecision::discard(event.id(), rule.id(), reason));
                    break;
                }
                Err(err) => {
                    verdict = Some(self.fail_open_decision(event, &err));
                    break;
                }
            }
        }

        let decision = verdict.unwrap_or_else(|| {
            FilterDecision::keep(event.id(), DEFAULT_RULE_ID, "no rule matched")
        });

        if decision.kept {
            cache.record_kept(
                event.entity_id(),
                event.timestamp(),
                event.new_state(),
                self.cooldown,
            );
            self.kept.fetch_add(1, Ordering::Relaxed);
        }

        decision
    }

    fn fail_open(&self, event: &Event, err: RuleError) -> FilterDecision {
        let decision = self.fail_open_decision(event, &err);
        self.kept.fetch_add(1, Ordering::Relaxed);
        decision
    }

    fn fail_open_decision(&self, event: &Event, err: &RuleError) -> FilterDecision {
        self.rule_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            event_id = %event.id(),
            entity_id = %event.entity_id(),
            error = %err,
            "filter rule failed; keeping event (fail open)"
        );
        FilterDecision::keep(event.id(), FAIL_OPEN_RULE_ID, err.to_string())
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            kept: self.kept.load(Ordering::Relaxed),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use homeflow_core::ConnectionId;
    use proptest::prelude::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn event(entity: &str, ms: i64, old: &str, new: &str) -> Event {
        Event::new(ConnectionId::new(), EntityId::new(entity), "state_changed", at(ms))
            .with_states(Some(old.to_string()), Some(new.to_string()))
    }

    struct Failing;

    impl FilterRule for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn evaluate(&self, _: &Event, _: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
            Err(RuleError::evaluation("failing", "boom"))
        }
    }

    struct Panicking;

    impl FilterRule for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _: &Event, _: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
            panic!("rule bug")
        }
    }

    struct DropAll;

    impl FilterRule for DropAll {
        fn id(&self) -> &str {
            "drop_all"
        }

        fn evaluate(&self, _: &Event, _: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
            Ok(RuleOutcome::drop("everything"))
        }
    }

    #[test]
    fn keeps_by_default() {
        let engine = FilterEngine::new(FilterConfig::default());
        let d = engine.evaluate(&event("light.a", 0, "off", "on"));
        assert!(d.kept);
        assert_eq!(d.rule_id, DEFAULT_RULE_ID);
    }

    #[test]
    fn suppresses_repeat_within_cooldown() {
        let engine = FilterEngine::new(FilterConfig::default());
        assert!(engine.evaluate(&event("light.a", 0, "off", "on")).kept);

        let repeat = engine.evaluate(&event("light.a", 200, "off", "on"));
        assert!(!repeat.kept);
        assert_eq!(repeat.rule_id, FrequencyRule::ID);

        assert!(engine.evaluate(&event("light.a", 1200, "off", "on")).kept);
    }

    #[test]
    fn rule_error_fails_open() {
        let engine = FilterEngine::with_rules(
            FilterConfig::default(),
            vec![Box::new(Failing), Box::new(DropAll)],
        );
        let d = engine.evaluate(&event("light.a", 0, "off", "on"));
        assert!(d.kept);
        assert_eq!(d.rule_id, FAIL_OPEN_RULE_ID);
        assert_eq!(engine.stats().rule_errors, 1);
    }

    #[test]
    fn rule_panic_fails_open() {
        let engine = FilterEngine::with_rules(FilterConfig::default(), vec![Box::new(Panicking)]);
        let d = engine.evaluate(&event("light.a", 0, "off", "on"));
        assert!(d.kept);
        assert_eq!(d.rule_id, FAIL_OPEN_RULE_ID);

        // The engine keeps working afterwards.
        let d = engine.evaluate(&event("light.b", 0, "off", "on"));
        assert!(d.kept);
        assert_eq!(engine.stats().rule_errors, 2);
    }

    #[test]
    fn safety_sensors_are_never_suppressed() {
        let engine = FilterEngine::new(FilterConfig::default());
        let smoke = |ms| {
            event("binary_sensor.hall_smoke", ms, "off", "on").with_attributes(
                json!({"device_class": "smoke"}).as_object().cloned().unwrap(),
            )
        };

        for ms in 0..20 {
            assert!(engine.evaluate(&smoke(ms)).kept);
        }
    }

    #[test]
    fn user_deny_applies_after_builtin_rules() {
        let config = FilterConfig::default().with_user_rules(vec![UserRule::deny("no-media", "media_player.*")]);
        let engine = FilterEngine::new(config);

        let d = engine.evaluate(&event("media_player.tv", 0, "idle", "playing"));
        assert!(!d.kept);
        assert_eq!(d.rule_id, UserRuleSet::ID);
    }

    #[test]
    fn thousand_duplicates_within_cooldown_are_mostly_suppressed() {
        let engine = FilterEngine::new(FilterConfig::default());
        let kept = (0..1000)
            .filter(|i| engine.evaluate(&event("switch.pump", *i, "off", "on")).kept)
            .count();
        assert_eq!(kept, 1);
    }

    proptest! {
        #[test]
        fn exactly_one_decision_per_event(
            steps in prop::collection::vec((0usize..4, 0i64..3000, 0usize..3), 1..200)
        ) {
            let engine = FilterEngine::new(FilterConfig::default());
            let entities = ["light.a", "sensor.temp", "lock.door", "switch.b"];
            let states = ["on", "off", "21.5"];

            for (e, ms, s) in steps {
                let ev = event(entities[e], ms, "off", states[s]);
                let d = engine.evaluate(&ev);
                prop_assert_eq!(d.event_id, ev.id());
            }

            let stats = engine.stats();
            prop_assert!(stats.kept <= stats.evaluated);
        }
    }
}
