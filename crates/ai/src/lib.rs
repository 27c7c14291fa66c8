//! `homeflow-ai`
//!
//! **Responsibility:** the AI-suggestion boundary of the batch process.
//!
//! - derive automation contexts from behavioral pattern data
//! - ask an external model for a candidate automation per context
//! - validate candidates (syntax, logic, security, performance)
//! - decide whether a candidate needs human approval
//!
//! This crate never touches storage or schedules work; the batch orchestrator
//! in `homeflow-infra` drives it.

pub mod approval;
pub mod context;
pub mod generator;
pub mod preferences;
pub mod result;
pub mod suggestion;
pub mod validator;

pub use approval::{
    ApprovalDecision, ApprovalError, ChangeType, LimitType, SafetyLimit, SafetyLimitEnforcer,
    SafetyLimitSource,
};
pub use context::{
    AutomationContext, BehaviorPattern, ContextAggregator, PatternKind, PatternSource,
    PatternSummary,
};
pub use generator::{
    Completion, FallbackBackend, GenerationRequest, SuggestionBackend, SuggestionGenerator,
};
pub use preferences::UserPreferences;
pub use result::AiError;
pub use suggestion::{
    Action, AutomationConfig, AutomationMode, Condition, Suggestion, SuggestionStatus, Trigger,
};
pub use validator::{
    IssueSeverity, StageResult, SuggestionValidator, ValidationIssue, ValidationReport,
    ValidationStage, ValidatorConfig,
};
