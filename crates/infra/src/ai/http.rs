use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use homeflow_ai::{AiError, Completion, GenerationRequest, SuggestionBackend};

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Local model server speaking the Ollama generate API.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> OllamaRequest<'a> {
        OllamaRequest {
            model: &self.model,
            system: &request.system,
            prompt: &request.prompt,
            stream: false,
            format: "json",
        }
    }
}

#[async_trait]
impl SuggestionBackend for OllamaBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, AiError> {
        let resp = self
            .client
            .post(self.endpoint())
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| network_error(self.name(), e))?;

        let text = read_body(self.name(), resp).await?;
        let parsed: OllamaResponse =
            serde_json::from_str(&text).map_err(|e| AiError::MalformedCompletion(e.to_string()))?;

        Ok(Completion {
            backend: self.name().to_string(),
            text: parsed.response,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Hosted model behind an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: 0.2,
        }
    }
}

fn first_choice(text: &str) -> Result<String, AiError> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| AiError::MalformedCompletion(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AiError::MalformedCompletion("response has no choices".to_string()))
}

#[async_trait]
impl SuggestionBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, AiError> {
        let mut req = self.client.post(self.endpoint()).json(&self.body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| network_error(self.name(), e))?;
        let text = read_body(self.name(), resp).await?;

        Ok(Completion {
            backend: self.name().to_string(),
            text: first_choice(&text)?,
        })
    }
}

fn network_error(backend: &str, e: reqwest::Error) -> AiError {
    if e.is_timeout() {
        AiError::unavailable(backend, "request timed out")
    } else {
        AiError::unavailable(backend, e.to_string())
    }
}

async fn read_body(backend: &str, resp: reqwest::Response) -> Result<String, AiError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|e| network_error(backend, e))?;
    if !status.is_success() {
        return Err(AiError::unavailable(backend, format!("HTTP {}: {}", status.as_u16(), text)));
    }
    Ok(text)
}
