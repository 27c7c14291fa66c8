//! Generated automation suggestions and their approval lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use homeflow_core::{BatchId, ConnectionId, ContextId, DomainError, SuggestionId};

use crate::approval::ApprovalDecision;
use crate::validator::ValidationReport;

/// Lifecycle status. `Approved`, `Rejected` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl SuggestionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SuggestionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "PENDING",
            SuggestionStatus::Approved => "APPROVED",
            SuggestionStatus::Rejected => "REJECTED",
            SuggestionStatus::Expired => "EXPIRED",
        }
    }
}

impl core::str::FromStr for SuggestionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(DomainError::validation(format!("unknown suggestion status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    #[default]
    Single,
    Restart,
    Queued,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum Trigger {
    State {
        entity_id: String,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        for_seconds: Option<u64>,
    },
    Time {
        at: String,
    },
    NumericState {
        entity_id: String,
        #[serde(default)]
        above: Option<f64>,
        #[serde(default)]
        below: Option<f64>,
    },
    Sun {
        event: String,
        #[serde(default)]
        offset_minutes: i32,
    },
}

impl Trigger {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Trigger::State { entity_id, .. } | Trigger::NumericState { entity_id, .. } => {
                Some(entity_id)
            }
            Trigger::Time { .. } | Trigger::Sun { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    State {
        entity_id: String,
        state: String,
    },
    Time {
        #[serde(default)]
        after: Option<String>,
        #[serde(default)]
        before: Option<String>,
    },
    NumericState {
        entity_id: String,
        #[serde(default)]
        above: Option<f64>,
        #[serde(default)]
        below: Option<f64>,
    },
}

impl Condition {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Condition::State { entity_id, .. } | Condition::NumericState { entity_id, .. } => {
                Some(entity_id)
            }
            Condition::Time { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// `<domain>.<service>`, e.g. `light.turn_on`.
    pub service: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub data: Map<String, JsonValue>,
}

impl Action {
    pub fn new(service: impl Into<String>, entity_ids: Vec<String>) -> Self {
        Self {
            service: service.into(),
            entity_ids,
            data: Map::new(),
        }
    }

    pub fn service_domain(&self) -> &str {
        self.service.split_once('.').map(|(d, _)| d).unwrap_or(&self.service)
    }

    pub fn service_name(&self) -> &str {
        self.service.split_once('.').map(|(_, s)| s).unwrap_or("")
    }
}

/// A candidate automation (trigger → condition → action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub mode: AutomationMode,
}

impl AutomationConfig {
    /// Every entity id referenced anywhere in the config.
    pub fn referenced_entities(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .triggers
            .iter()
            .filter_map(Trigger::entity_id)
            .chain(self.conditions.iter().filter_map(Condition::entity_id))
            .chain(
                self.actions
                    .iter()
                    .flat_map(|a| a.entity_ids.iter().map(String::as_str)),
            )
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// An AI-generated candidate automation.
///
/// Created by the generator in `Pending`; `confidence` and `validation` are
/// filled by the validator, `approval` by the safety enforcer. Status changes
/// only through [`Suggestion::approve`], [`Suggestion::reject`] and
/// [`Suggestion::expire`], and never leaves a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: SuggestionId,
    pub context_id: ContextId,
    pub connection_id: ConnectionId,
    pub batch_id: Option<BatchId>,
    pub title: String,
    pub config: AutomationConfig,
    pub confidence: f64,
    pub validation: Option<ValidationReport>,
    pub approval: Option<ApprovalDecision>,
    /// Set by the generator when the model marks the change as safety-critical.
    pub safety_critical: bool,
    /// Backend that produced the completion.
    pub backend: String,
    status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn new(
        context_id: ContextId,
        connection_id: ConnectionId,
        title: impl Into<String>,
        config: AutomationConfig,
        backend: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SuggestionId::new(),
            context_id,
            connection_id,
            batch_id: None,
            title: title.into(),
            config,
            confidence: 0.0,
            validation: None,
            approval: None,
            safety_critical: false,
            backend: backend.into(),
            status: SuggestionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrate a persisted suggestion with its stored status.
    pub fn restore(mut self, status: SuggestionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> SuggestionStatus {
        self.status
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.valid)
    }

    /// `true` unless the approval gate explicitly cleared it.
    pub fn approval_required(&self) -> bool {
        self.approval.as_ref().is_none_or(|a| a.approval_required)
    }

    pub fn apply_validation(&mut self, report: ValidationReport) {
        self.confidence = report.confidence_score;
        self.validation = Some(report);
        self.updated_at = Utc::now();
    }

    pub fn apply_approval(&mut self, decision: ApprovalDecision) {
        self.approval = Some(decision);
        self.updated_at = Utc::now();
    }

    /// Approve. Invalid suggestions are not approvable.
    pub fn approve(&mut self) -> Result<(), DomainError> {
        if !self.is_valid() {
            return Err(DomainError::invariant(format!(
                "suggestion {} failed validation and cannot be approved",
                self.id
            )));
        }
        self.transition(SuggestionStatus::Approved)
    }

    pub fn reject(&mut self) -> Result<(), DomainError> {
        self.transition(SuggestionStatus::Rejected)
    }

    pub fn expire(&mut self) -> Result<(), DomainError> {
        self.transition(SuggestionStatus::Expired)
    }

    fn transition(&mut self, to: SuggestionStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::illegal_transition(format!(
                "suggestion {} is {} and cannot become {}",
                self.id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}
