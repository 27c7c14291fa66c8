//! Pattern data loaded from a JSON file.
//!
//! ```json
//! {"connections": [
//!   {"connection_id": "0190...", "preferences": {"min_confidence": 0.6},
//!    "patterns": [{"kind": "time_of_day", "entities": ["light.kitchen"], ...}]}
//! ]}
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use homeflow_ai::{AiError, BehaviorPattern, PatternSource, UserPreferences};
use homeflow_core::ConnectionId;

#[derive(Debug, Error)]
pub enum PatternFileError {
    #[error("cannot read pattern file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    #[serde(default)]
    connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Deserialize)]
struct ConnectionEntry {
    connection_id: ConnectionId,
    #[serde(default = "default_preferences")]
    preferences: UserPreferences,
    #[serde(default)]
    patterns: Vec<BehaviorPattern>,
}

fn default_preferences() -> UserPreferences {
    UserPreferences::default()
}

/// Read-only pattern source backed by a snapshot of the file.
#[derive(Debug, Default)]
pub struct JsonFilePatternSource {
    patterns: HashMap<ConnectionId, Vec<BehaviorPattern>>,
    preferences: Vec<(ConnectionId, UserPreferences)>,
}

impl JsonFilePatternSource {
    pub fn load(path: &Path) -> Result<Self, PatternFileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PatternFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, PatternFileError> {
        let file: PatternFile = serde_json::from_str(raw)?;
        let mut out = Self::default();
        for entry in file.connections {
            out.preferences.push((entry.connection_id, entry.preferences));
            out.patterns
                .entry(entry.connection_id)
                .or_default()
                .extend(entry.patterns);
        }
        Ok(out)
    }

    /// Connections named in the file, with their owners' preferences.
    pub fn connections(&self) -> &[(ConnectionId, UserPreferences)] {
        &self.preferences
    }
}

impl PatternSource for JsonFilePatternSource {
    fn patterns_for(&self, connection_id: ConnectionId) -> Result<Vec<BehaviorPattern>, AiError> {
        Ok(self.patterns.get(&connection_id).cloned().unwrap_or_default())
    }
}
