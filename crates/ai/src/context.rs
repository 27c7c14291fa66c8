//! Automation contexts derived from behavioral pattern data.
//!
//! The aggregator is read-only: it pulls patterns from a [`PatternSource`],
//! keeps the ones inside the lookback window that clear the occurrence and
//! confidence floors, and groups them into contexts by the primary entity's
//! domain. No patterns means no contexts, never an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use homeflow_core::{ConnectionId, ContextId, EntityId, TimeRange};

use crate::result::AiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Same entity changes around the same time of day.
    TimeOfDay,
    /// One entity's change reliably follows another's.
    Sequence,
    /// Several entities change together.
    CoOccurrence,
    /// An entity is left in a state for long stretches (e.g. lights on, nobody home).
    Idle,
}

/// One observed behavior, as supplied by the pattern-mining collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPattern {
    pub kind: PatternKind,
    /// First entry is the primary entity.
    pub entities: Vec<EntityId>,
    pub description: String,
    pub occurrences: u32,
    pub confidence: f64,
    #[serde(default)]
    pub typical_time: Option<NaiveTime>,
    pub observed_at: DateTime<Utc>,
}

impl BehaviorPattern {
    pub fn primary_entity(&self) -> Option<&EntityId> {
        self.entities.first()
    }

    pub fn domain(&self) -> &str {
        self.primary_entity().map(EntityId::domain).unwrap_or("unknown")
    }
}

/// Compact view of the patterns behind one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub domain: String,
    pub patterns: Vec<BehaviorPattern>,
    pub total_occurrences: u64,
    pub mean_confidence: f64,
}

impl PatternSummary {
    fn from_patterns(domain: String, patterns: Vec<BehaviorPattern>) -> Self {
        let total_occurrences = patterns.iter().map(|p| u64::from(p.occurrences)).sum();
        let mean_confidence = if patterns.is_empty() {
            0.0
        } else {
            patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64
        };
        Self {
            domain,
            patterns,
            total_occurrences,
            mean_confidence,
        }
    }

    /// Every entity mentioned by the summarized patterns, sorted and deduplicated.
    pub fn entities(&self) -> Vec<&EntityId> {
        let mut out: Vec<&EntityId> = self.patterns.iter().flat_map(|p| p.entities.iter()).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn mentions(&self, entity_id: &str) -> bool {
        self.patterns
            .iter()
            .flat_map(|p| p.entities.iter())
            .any(|e| e.as_str() == entity_id)
    }
}

/// Ephemeral per-run input to the generator. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationContext {
    pub context_id: ContextId,
    pub connection_id: ConnectionId,
    pub pattern_summary: PatternSummary,
    pub window: TimeRange,
}

/// Read access to mined behavior patterns.
pub trait PatternSource: Send + Sync {
    fn patterns_for(&self, connection_id: ConnectionId) -> Result<Vec<BehaviorPattern>, AiError>;
}

#[derive(Debug, Clone)]
pub struct ContextAggregator {
    lookback: Duration,
    min_occurrences: u32,
    min_confidence: f64,
    max_patterns_per_context: usize,
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(168),
            min_occurrences: 3,
            min_confidence: 0.5,
            max_patterns_per_context: 10,
        }
    }
}

impl ContextAggregator {
    pub fn new(lookback: Duration) -> Self {
        Self {
            lookback,
            ..Self::default()
        }
    }

    pub fn with_min_occurrences(mut self, min_occurrences: u32) -> Self {
        self.min_occurrences = min_occurrences;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_max_patterns_per_context(mut self, max: usize) -> Self {
        self.max_patterns_per_context = max.max(1);
        self
    }

    /// Build the contexts for `connection_id` as of `now`.
    ///
    /// Source failures propagate; the orchestrator counts them against the
    /// connection.
    pub fn build(
        &self,
        source: &dyn PatternSource,
        connection_id: ConnectionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AutomationContext>, AiError> {
        let window = TimeRange::ending_at(now, self.lookback);
        let patterns = source.patterns_for(connection_id)?;

        let mut by_domain: BTreeMap<String, Vec<BehaviorPattern>> = BTreeMap::new();
        for p in patterns {
            if !self.accepts(&p, &window) {
                continue;
            }
            by_domain.entry(p.domain().to_string()).or_default().push(p);
        }

        let mut contexts = Vec::new();
        for (domain, mut patterns) in by_domain {
            // Strongest evidence first so each chunk is self-contained.
            patterns.sort_by(|a, b| {
                b.occurrences
                    .cmp(&a.occurrences)
                    .then(b.confidence.total_cmp(&a.confidence))
            });
            for chunk in patterns.chunks(self.max_patterns_per_context) {
                contexts.push(AutomationContext {
                    context_id: ContextId::new(),
                    connection_id,
                    pattern_summary: PatternSummary::from_patterns(domain.clone(), chunk.to_vec()),
                    window,
                });
            }
        }

        tracing::debug!(
            connection_id = %connection_id,
            contexts = contexts.len(),
            "built automation contexts"
        );
        Ok(contexts)
    }

    fn accepts(&self, p: &BehaviorPattern, window: &TimeRange) -> bool {
        !p.entities.is_empty()
            && window.contains(p.observed_at)
            && p.occurrences >= self.min_occurrences
            && p.confidence.is_finite()
            && p.confidence >= self.min_confidence
    }
}
