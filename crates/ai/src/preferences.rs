use serde::{Deserialize, Serialize};

use homeflow_core::Glob;

/// Owner preferences that shape generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Entity globs the owner never wants automated.
    #[serde(default)]
    pub excluded_entities: Vec<Glob>,
    /// Domains to favour when several patterns compete (`light`, `climate`, ...).
    #[serde(default)]
    pub preferred_domains: Vec<String>,
    /// Suggestions scoring below this after validation are not kept.
    #[serde(default)]
    pub min_confidence: f64,
    /// Upper bound on actions per generated automation.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    /// Free-text guidance forwarded to the model.
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_max_actions() -> usize {
    5
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            excluded_entities: Vec::new(),
            preferred_domains: Vec::new(),
            min_confidence: 0.0,
            max_actions: default_max_actions(),
            notes: None,
        }
    }
}

impl UserPreferences {
    pub fn is_excluded(&self, entity_id: &str) -> bool {
        self.excluded_entities.iter().any(|g| g.matches(entity_id))
    }

    /// `true` when any entity in `entities` is excluded.
    pub fn touches_excluded<'a>(&self, mut entities: impl Iterator<Item = &'a str>) -> bool {
        entities.any(|e| self.is_excluded(e))
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_excluded(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_entities.push(Glob::new(pattern.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_uses_globs() {
        let prefs = UserPreferences::default().with_excluded("lock.*");
        assert!(prefs.is_excluded("lock.front_door"));
        assert!(!prefs.is_excluded("light.kitchen"));
        assert!(prefs.touches_excluded(["light.kitchen", "lock.back"].into_iter()));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let prefs: UserPreferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs, UserPreferences::default());
    }
}
