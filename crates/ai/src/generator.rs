//! Suggestion generation against an external model.
//!
//! [`SuggestionGenerator::generate`] never fails: a timeout, an unreachable
//! backend, or an unparsable completion all come back as `None` so the batch
//! moves on to the next context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::AutomationContext;
use crate::preferences::UserPreferences;
use crate::result::AiError;
use crate::suggestion::{AutomationConfig, Suggestion};

/// What a backend is asked to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
}

/// Raw completion text plus the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub backend: String,
    pub text: String,
}

#[async_trait]
pub trait SuggestionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, AiError>;
}

/// Local-first strategy: ask the local model, fall back to the cloud model on
/// any local failure. With a call timeout set, a hung local model counts as a
/// failure and the cloud model still gets its own full budget.
pub struct FallbackBackend {
    local: Option<Arc<dyn SuggestionBackend>>,
    cloud: Option<Arc<dyn SuggestionBackend>>,
    call_timeout: Option<Duration>,
}

impl FallbackBackend {
    pub fn new(
        local: Option<Arc<dyn SuggestionBackend>>,
        cloud: Option<Arc<dyn SuggestionBackend>>,
    ) -> Self {
        Self {
            local,
            cloud,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Number of backends a single request may reach.
    pub fn backend_count(&self) -> usize {
        self.local.iter().count() + self.cloud.iter().count()
    }

    async fn call(
        &self,
        backend: &dyn SuggestionBackend,
        request: &GenerationRequest,
    ) -> Result<Completion, AiError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, backend.complete(request))
                .await
                .map_err(|_| AiError::Timeout(limit.as_millis() as u64))?,
            None => backend.complete(request).await,
        }
    }
}

#[async_trait]
impl SuggestionBackend for FallbackBackend {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, AiError> {
        let mut last_err = None;

        if let Some(local) = &self.local {
            match self.call(local.as_ref(), request).await {
                Ok(c) => return Ok(c),
                Err(e) => {
                    tracing::debug!(backend = local.name(), error = %e, "local backend failed, trying cloud");
                    last_err = Some(e);
                }
            }
        }

        if let Some(cloud) = &self.cloud {
            return self.call(cloud.as_ref(), request).await;
        }

        Err(last_err.unwrap_or_else(|| AiError::unavailable("fallback", "no backend configured")))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    safety_critical: bool,
    automation: AutomationConfig,
}

const SYSTEM_PROMPT: &str = "You design home automations. Reply with a single JSON object \
{\"title\": string, \"safety_critical\": bool, \"automation\": {\"alias\", \"description\", \
\"triggers\", \"conditions\", \"actions\", \"mode\"}} and nothing else.";

/// `timeout` is the budget for one whole generation, fallback included.
pub struct SuggestionGenerator {
    backend: Arc<dyn SuggestionBackend>,
    timeout: Duration,
}

impl SuggestionGenerator {
    pub fn new(backend: Arc<dyn SuggestionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Generate one candidate for `context`, or `None` when the backend
    /// times out, fails, returns something unusable, or proposes touching an
    /// excluded entity.
    pub async fn generate(
        &self,
        context: &AutomationContext,
        preferences: &UserPreferences,
    ) -> Option<Suggestion> {
        match self.try_generate(context, preferences).await {
            Ok(s) if preferences.touches_excluded(s.config.referenced_entities().into_iter()) => {
                tracing::debug!(
                    context_id = %context.context_id,
                    "discarding suggestion touching an excluded entity"
                );
                None
            }
            Ok(s) => Some(s),
            Err(AiError::Timeout(ms)) => {
                tracing::warn!(
                    context_id = %context.context_id,
                    timeout_ms = ms,
                    "suggestion backend timed out"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    context_id = %context.context_id,
                    error = %e,
                    "suggestion generation failed"
                );
                None
            }
        }
    }

    /// Like [`Self::generate`] but surfaces the failure.
    pub async fn try_generate(
        &self,
        context: &AutomationContext,
        preferences: &UserPreferences,
    ) -> Result<Suggestion, AiError> {
        if context.pattern_summary.patterns.is_empty() {
            return Err(AiError::InvalidInput("context has no patterns".to_string()));
        }

        let request = build_request(context, preferences);
        let completion = tokio::time::timeout(self.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| AiError::Timeout(self.timeout.as_millis() as u64))??;

        let payload = parse_completion(&completion.text)?;
        let title = payload
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| payload.automation.alias.clone());

        let mut suggestion = Suggestion::new(
            context.context_id,
            context.connection_id,
            title,
            payload.automation,
            completion.backend,
        );
        suggestion.safety_critical = payload.safety_critical;
        Ok(suggestion)
    }
}

pub(crate) fn build_request(
    context: &AutomationContext,
    preferences: &UserPreferences,
) -> GenerationRequest {
    let summary = &context.pattern_summary;
    let mut prompt = format!(
        "Observed behavior for the '{}' domain between {} and {}:\n",
        summary.domain,
        context.window.start().to_rfc3339(),
        context.window.end().to_rfc3339(),
    );
    for p in &summary.patterns {
        let entities: Vec<&str> = p.entities.iter().map(|e| e.as_str()).collect();
        prompt.push_str(&format!(
            "- {} (entities: {}; seen {} times; confidence {:.2}",
            p.description,
            entities.join(", "),
            p.occurrences,
            p.confidence
        ));
        if let Some(t) = p.typical_time {
            prompt.push_str(&format!("; usually around {}", t.format("%H:%M")));
        }
        prompt.push_str(")\n");
    }

    prompt.push_str(&format!(
        "Propose one automation with at most {} actions.\n",
        preferences.max_actions
    ));
    if !preferences.excluded_entities.is_empty() {
        let excluded: Vec<&str> = preferences.excluded_entities.iter().map(|g| g.as_str()).collect();
        prompt.push_str(&format!("Never touch: {}.\n", excluded.join(", ")));
    }
    if !preferences.preferred_domains.is_empty() {
        prompt.push_str(&format!(
            "Prefer these domains: {}.\n",
            preferences.preferred_domains.join(", ")
        ));
    }
    if let Some(notes) = &preferences.notes {
        prompt.push_str(&format!("Owner notes: {notes}\n"));
    }

    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
    }
}

/// Accepts either the full payload or a bare automation, optionally wrapped in
/// prose or a fenced code block.
fn parse_completion(text: &str) -> Result<CompletionPayload, AiError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(AiError::MalformedCompletion("no JSON object in completion".to_string())),
    };

    if let Ok(payload) = serde_json::from_str::<CompletionPayload>(json) {
        return Ok(payload);
    }
    serde_json::from_str::<AutomationConfig>(json)
        .map(|automation| CompletionPayload {
            title: None,
            safety_critical: false,
            automation,
        })
        .map_err(|e| AiError::MalformedCompletion(e.to_string()))
}
