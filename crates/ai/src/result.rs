use thiserror::Error;

/// Failure talking to, or interpreting, an AI backend.
///
/// Never escapes [`crate::SuggestionGenerator::generate`]; the generator
/// degrades every variant to an empty result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend '{backend}' unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("backend call timed out after {0}ms")]
    Timeout(u64),

    #[error("completion could not be parsed: {0}")]
    MalformedCompletion(String),

    #[error("pattern data unavailable: {0}")]
    PatternSource(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }
}
