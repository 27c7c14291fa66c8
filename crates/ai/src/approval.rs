//! Approval gate.
//!
//! Decides whether a validated suggestion needs a human before it can be
//! applied. This path fails **closed**: any error or panic while evaluating
//! limits yields `approval_required = true`. The filter engine deliberately
//! does the opposite (fail open); the two policies are not meant to agree.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use homeflow_core::ConnectionId;

use crate::suggestion::{Action, Suggestion};

/// What kind of change an action makes, derived from its service domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Lighting,
    Climate,
    Appliance,
    Media,
    Notification,
    /// Alarm panels, sirens, cameras.
    Security,
    /// Locks and entry covers (garage doors, gates).
    Access,
    Other,
}

impl ChangeType {
    pub fn of(action: &Action) -> Self {
        match action.service_domain() {
            "light" | "scene" => ChangeType::Lighting,
            "climate" | "fan" | "water_heater" | "humidifier" => ChangeType::Climate,
            "switch" | "vacuum" | "valve" => ChangeType::Appliance,
            "media_player" | "tts" => ChangeType::Media,
            "notify" | "persistent_notification" => ChangeType::Notification,
            "alarm_control_panel" | "siren" | "camera" => ChangeType::Security,
            "lock" => ChangeType::Access,
            "cover"
                if action
                    .entity_ids
                    .iter()
                    .any(|e| e.contains("garage") || e.contains("gate") || e.contains("door")) =>
            {
                ChangeType::Access
            }
            "cover" => ChangeType::Appliance,
            _ => ChangeType::Other,
        }
    }

    pub fn is_safety_critical(&self) -> bool {
        matches!(self, ChangeType::Security | ChangeType::Access)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "change_type", rename_all = "snake_case")]
pub enum LimitType {
    /// Any action of this change type.
    ChangeType(ChangeType),
    /// Validator cost estimate above `max_value`.
    PerformanceImpact,
    /// More than `max_value` actions.
    ActionCount,
}

/// Externally configured ceiling. Read-only to the enforcer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimit {
    pub id: String,
    pub limit_type: LimitType,
    pub max_value: f64,
    pub approval_required: bool,
}

impl SafetyLimit {
    pub fn change_type(id: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            id: id.into(),
            limit_type: LimitType::ChangeType(change_type),
            max_value: 0.0,
            approval_required: true,
        }
    }

    pub fn performance(id: impl Into<String>, max_cost: f64) -> Self {
        Self {
            id: id.into(),
            limit_type: LimitType::PerformanceImpact,
            max_value: max_cost,
            approval_required: true,
        }
    }

    pub fn action_count(id: impl Into<String>, max_actions: f64) -> Self {
        Self {
            id: id.into(),
            limit_type: LimitType::ActionCount,
            max_value: max_actions,
            approval_required: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("safety limit '{id}' is invalid: {reason}")]
    InvalidLimit { id: String, reason: String },

    #[error("suggestion has not been validated")]
    MissingValidation,

    #[error("safety limits unavailable: {0}")]
    Source(String),

    #[error("limit evaluation panicked: {0}")]
    Panicked(String),
}

/// Owner-configured limits, looked up per connection.
pub trait SafetyLimitSource: Send + Sync {
    fn limits_for(&self, connection_id: ConnectionId) -> Result<Vec<SafetyLimit>, ApprovalError>;
}

/// The same limits for every connection.
impl SafetyLimitSource for Vec<SafetyLimit> {
    fn limits_for(&self, _connection_id: ConnectionId) -> Result<Vec<SafetyLimit>, ApprovalError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approval_required: bool,
    /// Why approval is required. Empty when it is not.
    pub reasons: Vec<String>,
    /// `true` when the decision came from an evaluation failure.
    pub fail_closed: bool,
}

impl ApprovalDecision {
    pub fn not_required() -> Self {
        Self {
            approval_required: false,
            reasons: Vec::new(),
            fail_closed: false,
        }
    }

    fn failed(err: &ApprovalError) -> Self {
        Self {
            approval_required: true,
            reasons: vec![err.to_string()],
            fail_closed: true,
        }
    }
}

pub struct SafetyLimitEnforcer {
    source: Arc<dyn SafetyLimitSource>,
}

impl SafetyLimitEnforcer {
    pub fn new(source: Arc<dyn SafetyLimitSource>) -> Self {
        Self { source }
    }

    /// Never fails; errors and panics become `approval_required = true`.
    pub fn evaluate(&self, suggestion: &Suggestion) -> ApprovalDecision {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.try_evaluate(suggestion)))
            .unwrap_or_else(|payload| Err(ApprovalError::Panicked(panic_message(payload.as_ref()))));

        match outcome {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(
                    suggestion_id = %suggestion.id,
                    error = %err,
                    "safety limit evaluation failed, requiring approval"
                );
                ApprovalDecision::failed(&err)
            }
        }
    }

    pub fn try_evaluate(&self, suggestion: &Suggestion) -> Result<ApprovalDecision, ApprovalError> {
        let report = suggestion
            .validation
            .as_ref()
            .ok_or(ApprovalError::MissingValidation)?;
        let limits = self.source.limits_for(suggestion.connection_id)?;

        let change_types: Vec<ChangeType> = suggestion.config.actions.iter().map(ChangeType::of).collect();
        let mut reasons = Vec::new();

        for limit in &limits {
            if !limit.max_value.is_finite() || limit.max_value < 0.0 {
                return Err(ApprovalError::InvalidLimit {
                    id: limit.id.clone(),
                    reason: format!("max_value {} is not a non-negative number", limit.max_value),
                });
            }
            if !limit.approval_required {
                continue;
            }
            match limit.limit_type {
                LimitType::ChangeType(ct) if change_types.contains(&ct) => {
                    reasons.push(format!("limit '{}': {ct:?} changes need approval", limit.id));
                }
                LimitType::PerformanceImpact if report.estimated_cost > limit.max_value => {
                    reasons.push(format!(
                        "limit '{}': estimated cost {:.1} exceeds {:.1}",
                        limit.id, report.estimated_cost, limit.max_value
                    ));
                }
                LimitType::ActionCount if suggestion.config.actions.len() as f64 > limit.max_value => {
                    reasons.push(format!(
                        "limit '{}': {} actions exceed {}",
                        limit.id,
                        suggestion.config.actions.len(),
                        limit.max_value
                    ));
                }
                _ => {}
            }
        }

        if suggestion.safety_critical {
            reasons.push("flagged safety-critical".to_string());
        } else if change_types.iter().any(ChangeType::is_safety_critical) {
            reasons.push("touches security or access devices".to_string());
        }

        Ok(ApprovalDecision {
            approval_required: !reasons.is_empty(),
            reasons,
            fail_closed: false,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::{AutomationConfig, AutomationMode, Trigger};
    use crate::validator::ValidationReport;
    use homeflow_core::ContextId;

    fn suggestion(actions: Vec<Action>, cost: f64) -> Suggestion {
        let config = AutomationConfig {
            alias: "a".into(),
            description: String::new(),
            triggers: vec![Trigger::Time { at: "07:00".into() }],
            conditions: vec![],
            actions,
            mode: AutomationMode::Single,
        };
        let mut s = Suggestion::new(ContextId::new(), ConnectionId::new(), "t", config, "test");
        s.apply_validation(ValidationReport {
            valid: true,
            confidence_score: 0.9,
            issues: vec![],
            stages: vec![],
            estimated_cost: cost,
        });
        s
    }

    fn lights() -> Vec<Action> {
        vec![Action::new("light.turn_on", vec!["light.kitchen".into()])]
    }

    fn enforcer(limits: Vec<SafetyLimit>) -> SafetyLimitEnforcer {
        SafetyLimitEnforcer::new(Arc::new(limits))
    }

    struct Failing;

    impl SafetyLimitSource for Failing {
        fn limits_for(&self, _: ConnectionId) -> Result<Vec<SafetyLimit>, ApprovalError> {
            Err(ApprovalError::Source("limits store offline".into()))
        }
    }

    struct Exploding;

    impl SafetyLimitSource for Exploding {
        fn limits_for(&self, _: ConnectionId) -> Result<Vec<SafetyLimit>, ApprovalError> {
            panic!("limit table corrupted")
        }
    }

    #[test]
    fn plain_change_within_limits_needs_no_approval() {
        let d = enforcer(vec![
            SafetyLimit::change_type("climate", ChangeType::Climate),
            SafetyLimit::performance("perf", 40.0),
        ])
        .evaluate(&suggestion(lights(), 10.0));
        assert_eq!(d, ApprovalDecision::not_required());
    }

    #[test]
    fn each_trigger_requires_approval() {
        let e = enforcer(vec![
            SafetyLimit::change_type("lights", ChangeType::Lighting),
            SafetyLimit::performance("perf", 40.0),
            SafetyLimit::action_count("count", 2.0),
        ]);
        assert!(e.evaluate(&suggestion(lights(), 10.0)).approval_required);

        let e = enforcer(vec![SafetyLimit::performance("perf", 40.0)]);
        assert!(e.evaluate(&suggestion(lights(), 41.0)).approval_required);

        let mut s = suggestion(lights(), 1.0);
        s.safety_critical = true;
        assert!(enforcer(vec![]).evaluate(&s).approval_required);

        let unlock = vec![Action::new("lock.unlock", vec!["lock.front".into()])];
        assert!(enforcer(vec![]).evaluate(&suggestion(unlock, 1.0)).approval_required);
    }

    #[test]
    fn limits_without_approval_flag_are_ignored() {
        let mut limit = SafetyLimit::change_type("lights", ChangeType::Lighting);
        limit.approval_required = false;
        assert!(!enforcer(vec![limit]).evaluate(&suggestion(lights(), 1.0)).approval_required);
    }

    #[test]
    fn fails_closed_on_source_error() {
        let d = SafetyLimitEnforcer::new(Arc::new(Failing)).evaluate(&suggestion(lights(), 1.0));
        assert!(d.approval_required);
        assert!(d.fail_closed);
    }

    #[test]
    fn fails_closed_on_panic() {
        let d = SafetyLimitEnforcer::new(Arc::new(Exploding)).evaluate(&suggestion(lights(), 1.0));
        assert!(d.approval_required);
        assert!(d.fail_closed);
        assert!(d.reasons[0].contains("limit table corrupted"));
    }

    #[test]
    fn fails_closed_on_invalid_limit_or_missing_validation() {
        let d = enforcer(vec![SafetyLimit::performance("perf", f64::NAN)]).evaluate(&suggestion(lights(), 1.0));
        assert!(d.approval_required && d.fail_closed);

        let mut s = suggestion(lights(), 1.0);
        s.validation = None;
        let d = enforcer(vec![]).evaluate(&s);
        assert!(d.approval_required && d.fail_closed);
    }

    #[test]
    fn garage_covers_are_access_changes() {
        assert_eq!(
            ChangeType::of(&Action::new("cover.open_cover", vec!["cover.garage_door".into()])),
            ChangeType::Access
        );
        assert_eq!(
            ChangeType::of(&Action::new("cover.open_cover", vec!["cover.living_blinds".into()])),
            ChangeType::Appliance
        );
    }
}
