use serde::{Deserialize, Serialize};

use homeflow_core::EventId;

/// Outcome of filtering one event. Exactly one is produced per ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub event_id: EventId,
    pub kept: bool,
    /// Id of the rule that decided, `default` when nothing matched, or
    /// `fail_open` when evaluation errored.
    pub rule_id: String,
    pub reason: String,
}

impl FilterDecision {
    pub fn keep(event_id: EventId, rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event_id,
            kept: true,
            rule_id: rule_id.into(),
            reason: reason.into(),
        }
    }

    pub fn discard(event_id: EventId, rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event_id,
            kept: false,
            rule_id: rule_id.into(),
            reason: reason.into(),
        }
    }
}
