//! Minimal `*` wildcard matching for entity patterns.

use serde::{Deserialize, Serialize};

/// A glob where `*` matches any run of characters (including none).
/// Every other character matches itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Glob(String);

impl Glob {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, input: &str) -> bool {
        let mut parts = self.0.split('*');
        // split always yields at least one item.
        let first = parts.next().unwrap_or_default();
        let Some(mut rest) = input.strip_prefix(first) else {
            return false;
        };

        let tail: Vec<&str> = parts.collect();
        let Some((last, middle)) = tail.split_last() else {
            // No `*` at all: exact match.
            return rest.is_empty();
        };

        for part in middle {
            match rest.find(part) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }

        rest.ends_with(last)
    }
}

impl From<&str> for Glob {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcards() {
        assert!(Glob::new("light.kitchen").matches("light.kitchen"));
        assert!(!Glob::new("light.kitchen").matches("light.kitchen_2"));
        assert!(Glob::new("light.*").matches("light.kitchen"));
        assert!(Glob::new("*").matches(""));
        assert!(Glob::new("sensor.*_uptime").matches("sensor.router_uptime"));
        assert!(!Glob::new("sensor.*_uptime").matches("sensor.router_uptime_2"));
        assert!(Glob::new("*.*_battery*").matches("sensor.phone_battery_level"));
        assert!(!Glob::new("a*b*c").matches("acb"));
    }
}
