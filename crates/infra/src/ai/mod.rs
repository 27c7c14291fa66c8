//! HTTP adapters for suggestion backends.
//!
//! A local model server (Ollama-style `/api/generate`) is tried first; an
//! OpenAI-compatible chat endpoint is the fallback. Either may be absent.

mod http;

use std::sync::Arc;
use std::time::Duration;

use homeflow_ai::{AiError, FallbackBackend, SuggestionBackend};

pub use http::{OllamaBackend, OpenAiCompatibleBackend};

#[derive(Debug, Clone, PartialEq)]
pub struct AiBackendConfig {
    /// Budget for each backend call. A generation may spend it once per
    /// configured backend.
    pub timeout: Duration,
    pub local_url: Option<String>,
    pub cloud_url: Option<String>,
    pub cloud_api_key: Option<String>,
    pub model: String,
}

impl Default for AiBackendConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            local_url: None,
            cloud_url: None,
            cloud_api_key: None,
            model: "llama3".to_string(),
        }
    }
}

impl AiBackendConfig {
    pub fn is_configured(&self) -> bool {
        self.local_url.is_some() || self.cloud_url.is_some()
    }

    /// Whole-generation budget: one call timeout per configured backend.
    pub fn generation_budget(&self) -> Duration {
        let backends = u32::from(self.local_url.is_some()) + u32::from(self.cloud_url.is_some());
        self.timeout * backends.max(1)
    }
}

/// Local-then-cloud backend from config. With neither URL set every call
/// fails as unavailable and batches produce empty results.
pub fn build_backend(config: &AiBackendConfig) -> Result<FallbackBackend, AiError> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| AiError::Internal(format!("http client: {e}")))?;

    let local = config.local_url.as_ref().map(|url| {
        Arc::new(OllamaBackend::new(client.clone(), url.clone(), config.model.clone())) as Arc<dyn SuggestionBackend>
    });
    let cloud = config.cloud_url.as_ref().map(|url| {
        Arc::new(OpenAiCompatibleBackend::new(
            client.clone(),
            url.clone(),
            config.model.clone(),
            config.cloud_api_key.clone(),
        )) as Arc<dyn SuggestionBackend>
    });

    Ok(FallbackBackend::new(local, cloud).with_call_timeout(config.timeout))
}

#[cfg(test)]
mod tests {
    use homeflow_ai::GenerationRequest;

    use super::*;

    #[tokio::test]
    async fn unconfigured_backend_reports_unavailable() {
        let config = AiBackendConfig::default();
        assert!(!config.is_configured());

        let backend = build_backend(&config).unwrap();
        let err = backend
            .complete(&GenerationRequest {
                system: "s".to_string(),
                prompt: "p".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Unavailable { .. }));
    }

    #[test]
    fn generation_budget_covers_every_backend() {
        let mut config = AiBackendConfig {
            timeout: Duration::from_secs(10),
            ..AiBackendConfig::default()
        };
        assert_eq!(config.generation_budget(), Duration::from_secs(10));

        config.local_url = Some("http://localhost:11434".to_string());
        config.cloud_url = Some("https://api.example.com".to_string());
        assert_eq!(config.generation_budget(), Duration::from_secs(20));

        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.call_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(backend.backend_count(), 2);
    }
}
