//! Built-in filter rules, in evaluation order: frequency, noise, user.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use homeflow_core::Glob;

use super::{FilterRule, RuleContext, RuleError, RuleOutcome};
use crate::event::Event;

/// Suppresses repeats and flapping for one entity inside a cooldown window.
///
/// Within the window an event is dropped when its state equals the last kept
/// state, or when the entity already had `max_changes` kept events.
#[derive(Debug, Clone)]
pub struct FrequencyRule {
    cooldown: Duration,
    max_changes: u32,
}

impl FrequencyRule {
    pub const ID: &'static str = "frequency";

    pub fn new(cooldown: Duration, max_changes: u32) -> Self {
        Self {
            cooldown,
            max_changes: max_changes.max(1),
        }
    }
}

impl FilterRule for FrequencyRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn evaluate(&self, event: &Event, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if ctx.safety_relevant {
            return Ok(RuleOutcome::Continue);
        }
        let Some(recent) = ctx.recent else {
            return Ok(RuleOutcome::Continue);
        };

        let since = event.timestamp() - recent.window_start;
        if since.abs() >= self.cooldown {
            return Ok(RuleOutcome::Continue);
        }

        if event.new_state() == recent.last_state.as_deref() {
            return Ok(RuleOutcome::drop(format!(
                "duplicate state within cooldown ({}ms since window start)",
                since.num_milliseconds()
            )));
        }

        if recent.kept_in_window >= self.max_changes {
            return Ok(RuleOutcome::drop(format!(
                "flapping: {} changes already kept within {}ms cooldown",
                recent.kept_in_window,
                self.cooldown.num_milliseconds()
            )));
        }

        Ok(RuleOutcome::Continue)
    }
}

/// Drops known-noisy entities, attribute-only updates, and numeric jitter.
#[derive(Debug, Clone)]
pub struct NoiseRule {
    patterns: Vec<Glob>,
    numeric_jitter: f64,
}

impl NoiseRule {
    pub const ID: &'static str = "noise";

    pub fn new(patterns: Vec<Glob>, numeric_jitter: f64) -> Self {
        Self {
            patterns,
            numeric_jitter: numeric_jitter.max(0.0),
        }
    }
}

impl FilterRule for NoiseRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn evaluate(&self, event: &Event, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if ctx.safety_relevant {
            return Ok(RuleOutcome::Continue);
        }

        let entity = event.entity_id().as_str();
        if let Some(p) = self.patterns.iter().find(|p| p.matches(entity)) {
            return Ok(RuleOutcome::drop(format!("matches noise pattern '{}'", p.as_str())));
        }

        if let (Some(old), Some(new)) = (event.old_state(), event.new_state()) {
            if old == new {
                return Ok(RuleOutcome::drop("attribute-only update"));
            }
        }

        // Compare against what was last forwarded so slow drift still gets through.
        let reference = ctx
            .recent
            .and_then(|r| r.last_state.as_deref())
            .or(event.old_state());

        if let (Some(reference), Some(new)) = (reference, event.new_state()) {
            if let (Ok(a), Ok(b)) = (reference.parse::<f64>(), new.parse::<f64>()) {
                let delta = (b - a).abs();
                if delta.is_finite() && delta < self.numeric_jitter {
                    return Ok(RuleOutcome::drop(format!(
                        "numeric jitter {delta:.3} below {:.3}",
                        self.numeric_jitter
                    )));
                }
            }
        }

        Ok(RuleOutcome::Continue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRuleAction {
    Allow,
    Deny,
}

/// An owner-defined allow/deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRule {
    pub name: String,
    pub entity_pattern: Glob,
    /// Restrict to one event type; `None` matches all.
    #[serde(default)]
    pub event_type: Option<String>,
    pub action: UserRuleAction,
}

impl UserRule {
    pub fn allow(name: impl Into<String>, entity_pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_pattern: Glob::new(entity_pattern.into()),
            event_type: None,
            action: UserRuleAction::Allow,
        }
    }

    pub fn deny(name: impl Into<String>, entity_pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_pattern: Glob::new(entity_pattern.into()),
            event_type: None,
            action: UserRuleAction::Deny,
        }
    }

    pub fn for_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    fn matches(&self, event: &Event) -> bool {
        let type_ok = self
            .event_type
            .as_deref()
            .is_none_or(|t| t == event.event_type());
        type_ok && self.entity_pattern.matches(event.entity_id().as_str())
    }
}

/// Ordered user rules; first match wins.
#[derive(Debug, Clone, Default)]
pub struct UserRuleSet {
    rules: Vec<UserRule>,
}

impl UserRuleSet {
    pub const ID: &'static str = "user";

    pub fn new(rules: Vec<UserRule>) -> Self {
        Self { rules }
    }
}

impl FilterRule for UserRuleSet {
    fn id(&self) -> &str {
        Self::ID
    }

    fn evaluate(&self, event: &Event, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let Some(rule) = self.rules.iter().find(|r| r.matches(event)) else {
            return Ok(RuleOutcome::Continue);
        };

        Ok(match rule.action {
            UserRuleAction::Allow => RuleOutcome::keep(format!("allowed by user rule '{}'", rule.name)),
            UserRuleAction::Deny => RuleOutcome::drop(format!("denied by user rule '{}'", rule.name)),
        })
    }
}
