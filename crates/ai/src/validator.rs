//! Four-stage suggestion validation.
//!
//! Stages run independently and always all run, so the report lists every
//! issue found. A suggestion is valid only when every stage passes. The
//! confidence score is the weighted mean of stage scores, forced to zero when
//! the syntax or security stage fails. Validation is a pure function of
//! `(suggestion, context, config)`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use homeflow_core::{EntityId, Glob};

use crate::context::AutomationContext;
use crate::suggestion::{Action, AutomationConfig, Condition, Suggestion, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Syntax,
    Logic,
    Security,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub stage: ValidationStage,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: ValidationStage,
    pub passed: bool,
    /// In `[0, 1]`.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence_score: f64,
    pub issues: Vec<ValidationIssue>,
    pub stages: Vec<StageResult>,
    /// Performance estimate, in the same units as the configured threshold.
    pub estimated_cost: f64,
}

impl ValidationReport {
    pub fn stage(&self, stage: ValidationStage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    pub syntax_weight: f64,
    pub logic_weight: f64,
    pub security_weight: f64,
    pub performance_weight: f64,
    /// Estimated cost above which the performance stage fails.
    pub performance_threshold: f64,
    pub disallowed_services: Vec<Glob>,
    pub disallowed_entities: Vec<Glob>,
    /// Services that need at least one guarding condition.
    pub privileged_services: Vec<Glob>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            syntax_weight: 0.25,
            logic_weight: 0.25,
            security_weight: 0.3,
            performance_weight: 0.2,
            performance_threshold: 50.0,
            disallowed_services: [
                "shell_command.*",
                "python_script.*",
                "pyscript.*",
                "hassio.*",
                "homeassistant.restart",
                "homeassistant.stop",
                "recorder.purge*",
            ]
            .into_iter()
            .map(Glob::from)
            .collect(),
            disallowed_entities: ["*token*", "*password*", "*secret*", "*.admin*"]
                .into_iter()
                .map(Glob::from)
                .collect(),
            privileged_services: [
                "lock.unlock",
                "lock.open",
                "alarm_control_panel.alarm_disarm",
                "cover.open_cover",
            ]
            .into_iter()
            .map(Glob::from)
            .collect(),
        }
    }
}

impl ValidatorConfig {
    pub fn with_performance_threshold(mut self, threshold: f64) -> Self {
        self.performance_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuggestionValidator {
    config: ValidatorConfig,
}

struct Stage {
    stage: ValidationStage,
    issues: Vec<ValidationIssue>,
}

impl Stage {
    fn new(stage: ValidationStage) -> Self {
        Self {
            stage,
            issues: Vec::new(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(IssueSeverity::Error, message);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.push(IssueSeverity::Warning, message);
    }

    fn push(&mut self, severity: IssueSeverity, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            stage: self.stage,
            severity,
            message: message.into(),
        });
    }

    fn passed(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Errors zero the stage, each warning costs a tenth.
    fn score(&self) -> f64 {
        if !self.passed() {
            return 0.0;
        }
        let warnings = self.issues.len() as f64;
        (1.0 - 0.1 * warnings).max(0.5)
    }
}

impl SuggestionValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, suggestion: &Suggestion, context: &AutomationContext) -> ValidationReport {
        let cfg = &suggestion.config;

        let syntax = check_syntax(cfg);
        let logic = check_logic(cfg);
        let security = self.check_security(cfg, context);
        let (performance, estimated_cost, performance_score) = self.check_performance(cfg, context);

        let weighted = [
            (self.config.syntax_weight, syntax.score()),
            (self.config.logic_weight, logic.score()),
            (self.config.security_weight, security.score()),
            (self.config.performance_weight, performance_score),
        ];
        let total_weight: f64 = weighted.iter().map(|(w, _)| w.max(0.0)).sum();
        let mut confidence = if total_weight > 0.0 {
            weighted.iter().map(|(w, s)| w.max(0.0) * s).sum::<f64>() / total_weight
        } else {
            0.0
        };
        if !syntax.passed() || !security.passed() || !confidence.is_finite() {
            confidence = 0.0;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let stages = vec![
            StageResult {
                stage: ValidationStage::Syntax,
                passed: syntax.passed(),
                score: syntax.score(),
            },
            StageResult {
                stage: ValidationStage::Logic,
                passed: logic.passed(),
                score: logic.score(),
            },
            StageResult {
                stage: ValidationStage::Security,
                passed: security.passed(),
                score: security.score(),
            },
            StageResult {
                stage: ValidationStage::Performance,
                passed: performance.passed(),
                score: performance_score,
            },
        ];
        let valid = stages.iter().all(|s| s.passed);
        let issues = [syntax, logic, security, performance]
            .into_iter()
            .flat_map(|s| s.issues)
            .collect();

        ValidationReport {
            valid,
            confidence_score: confidence,
            issues,
            stages,
            estimated_cost,
        }
    }

    fn check_security(&self, cfg: &AutomationConfig, context: &AutomationContext) -> Stage {
        let mut stage = Stage::new(ValidationStage::Security);

        for action in &cfg.actions {
            if self.config.disallowed_services.iter().any(|g| g.matches(&action.service)) {
                stage.error(format!("service '{}' is not allowed", action.service));
            }
            if cfg.conditions.is_empty() && self.is_privileged(action) {
                stage.error(format!(
                    "privileged service '{}' requires a guarding condition",
                    action.service
                ));
            }
        }

        for entity in cfg.referenced_entities() {
            if self.config.disallowed_entities.iter().any(|g| g.matches(entity)) {
                stage.error(format!("entity '{entity}' is not allowed"));
            } else if !context.pattern_summary.mentions(entity) {
                stage.warn(format!("entity '{entity}' does not appear in observed behavior"));
            }
        }

        stage
    }

    fn is_privileged(&self, action: &Action) -> bool {
        if !self.config.privileged_services.iter().any(|g| g.matches(&action.service)) {
            return false;
        }
        // Covers are only privileged when they guard an opening into the home.
        if action.service_domain() == "cover" {
            return action
                .entity_ids
                .iter()
                .any(|e| e.contains("garage") || e.contains("gate") || e.contains("door"));
        }
        true
    }

    /// Cost per firing times expected firings per day.
    fn check_performance(&self, cfg: &AutomationConfig, context: &AutomationContext) -> (Stage, f64, f64) {
        let mut stage = Stage::new(ValidationStage::Performance);

        let trigger_cost: f64 = cfg
            .triggers
            .iter()
            .map(|t| match t {
                Trigger::State { .. } => 2.0,
                Trigger::NumericState { .. } => 3.0,
                Trigger::Time { .. } | Trigger::Sun { .. } => 1.0,
            })
            .sum();
        let condition_cost = cfg.conditions.len() as f64;
        let action_cost: f64 = cfg
            .actions
            .iter()
            .map(|a| 2.0 + a.entity_ids.len() as f64)
            .sum();

        let days = (context.window.duration().num_seconds() as f64 / 86_400.0).max(1.0);
        let trigger_occurrences: u64 = cfg
            .triggers
            .iter()
            .filter_map(Trigger::entity_id)
            .map(|entity| {
                context
                    .pattern_summary
                    .patterns
                    .iter()
                    .filter(|p| p.entities.iter().any(|e| e.as_str() == entity))
                    .map(|p| u64::from(p.occurrences))
                    .sum::<u64>()
            })
            .sum();
        let daily_fires = (trigger_occurrences as f64 / days).max(1.0);

        let estimated_cost = (trigger_cost + condition_cost + action_cost) * daily_fires;
        let threshold = self.config.performance_threshold;

        let score = if !threshold.is_finite() || threshold <= 0.0 {
            stage.error("performance threshold is not a positive number");
            0.0
        } else if estimated_cost > threshold {
            stage.error(format!(
                "estimated cost {estimated_cost:.1} exceeds threshold {threshold:.1}"
            ));
            threshold / estimated_cost
        } else {
            1.0
        };

        (stage, estimated_cost, score.clamp(0.0, 1.0))
    }
}

fn check_syntax(cfg: &AutomationConfig) -> Stage {
    let mut stage = Stage::new(ValidationStage::Syntax);

    if cfg.alias.trim().is_empty() {
        stage.error("alias is empty");
    }
    if cfg.triggers.is_empty() {
        stage.error("automation has no triggers");
    }
    if cfg.actions.is_empty() {
        stage.error("automation has no actions");
    }

    for t in &cfg.triggers {
        match t {
            Trigger::State { entity_id, from, to, .. } => {
                check_entity(&mut stage, entity_id);
                if from.is_some() && from == to {
                    stage.warn(format!("state trigger on '{entity_id}' has from == to"));
                }
            }
            Trigger::Time { at } => check_time(&mut stage, at),
            Trigger::NumericState { entity_id, above, below } => {
                check_entity(&mut stage, entity_id);
                check_bounds(&mut stage, entity_id, *above, *below);
            }
            Trigger::Sun { event, .. } => {
                if event != "sunrise" && event != "sunset" {
                    stage.error(format!("unknown sun event '{event}'"));
                }
            }
        }
    }

    for c in &cfg.conditions {
        match c {
            Condition::State { entity_id, state } => {
                check_entity(&mut stage, entity_id);
                if state.is_empty() {
                    stage.error(format!("state condition on '{entity_id}' has no state"));
                }
            }
            Condition::Time { after, before } => {
                if after.is_none() && before.is_none() {
                    stage.error("time condition has neither after nor before");
                }
                for t in [after, before].into_iter().flatten() {
                    check_time(&mut stage, t);
                }
            }
            Condition::NumericState { entity_id, above, below } => {
                check_entity(&mut stage, entity_id);
                check_bounds(&mut stage, entity_id, *above, *below);
            }
        }
    }

    for a in &cfg.actions {
        if !EntityId::is_well_formed(&a.service) {
            stage.error(format!("service '{}' is not <domain>.<service>", a.service));
        }
        for e in &a.entity_ids {
            check_entity(&mut stage, e);
        }
    }

    stage
}

fn check_entity(stage: &mut Stage, entity_id: &str) {
    if !EntityId::is_well_formed(entity_id) {
        stage.error(format!("malformed entity id '{entity_id}'"));
    }
}

fn check_time(stage: &mut Stage, raw: &str) {
    if parse_time(raw).is_none() {
        stage.error(format!("malformed time '{raw}', expected HH:MM or HH:MM:SS"));
    }
}

fn check_bounds(stage: &mut Stage, entity_id: &str, above: Option<f64>, below: Option<f64>) {
    match (above, below) {
        (None, None) => stage.error(format!("numeric check on '{entity_id}' has no bounds")),
        (a, b) if a.is_some_and(|v| !v.is_finite()) || b.is_some_and(|v| !v.is_finite()) => {
            stage.error(format!("numeric check on '{entity_id}' has a non-finite bound"))
        }
        _ => {}
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn check_logic(cfg: &AutomationConfig) -> Stage {
    let mut stage = Stage::new(ValidationStage::Logic);

    // A condition that can never hold when the trigger fires.
    for t in &cfg.triggers {
        let Trigger::State { entity_id, to: Some(to), .. } = t else {
            continue;
        };
        for c in &cfg.conditions {
            if let Condition::State { entity_id: ce, state } = c {
                if ce == entity_id && state != to {
                    stage.error(format!(
                        "trigger sets '{entity_id}' to '{to}' but condition requires '{state}'"
                    ));
                }
            }
        }
    }

    for (i, a) in cfg.conditions.iter().enumerate() {
        match a {
            Condition::State { entity_id, state } => {
                for b in &cfg.conditions[i + 1..] {
                    if let Condition::State { entity_id: e2, state: s2 } = b {
                        if e2 == entity_id && s2 != state {
                            stage.error(format!(
                                "conditions require '{entity_id}' to be both '{state}' and '{s2}'"
                            ));
                        }
                    }
                }
            }
            Condition::Time { after: Some(after), before: Some(before) } => {
                if parse_time(after).is_some() && parse_time(after) == parse_time(before) {
                    stage.error(format!("time condition window {after}..{before} is empty"));
                }
            }
            Condition::NumericState { entity_id, above: Some(above), below: Some(below) } => {
                if above >= below {
                    stage.error(format!(
                        "numeric condition on '{entity_id}' requires > {above} and < {below}"
                    ));
                }
            }
            _ => {}
        }
    }

    for t in &cfg.triggers {
        if let Trigger::NumericState { entity_id, above: Some(above), below: Some(below) } = t {
            if above >= below {
                stage.error(format!(
                    "numeric trigger on '{entity_id}' requires > {above} and < {below}"
                ));
            }
        }
    }

    // Opposing actions on the same entity within one run.
    for (i, a) in cfg.actions.iter().enumerate() {
        for b in &cfg.actions[i + 1..] {
            let opposing = matches!(
                (a.service_name(), b.service_name()),
                ("turn_on", "turn_off") | ("turn_off", "turn_on")
            );
            if !opposing {
                continue;
            }
            if let Some(e) = a.entity_ids.iter().find(|e| b.entity_ids.contains(e)) {
                stage.error(format!("actions both turn '{e}' on and off"));
            }
        }
    }

    let trigger_entities: Vec<&str> = cfg.triggers.iter().filter_map(Trigger::entity_id).collect();
    for a in &cfg.actions {
        for e in &a.entity_ids {
            if trigger_entities.contains(&e.as_str()) {
                stage.warn(format!("action on '{e}' may retrigger the automation"));
            }
        }
    }

    stage
}
