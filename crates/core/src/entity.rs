//! Hub entity identifiers (`<domain>.<object_id>`, e.g. `light.kitchen`).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a device/entity on the hub.
///
/// Well-formed ids have exactly one `.` separating a non-empty domain from a
/// non-empty object id, using lowercase ascii, digits and `_` only. Events from
/// the hub are not rejected for odd ids; use [`EntityId::parse`] where
/// well-formedness matters (e.g. generated automation configs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap a raw id without validation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parse and validate a well-formed entity id.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if Self::is_well_formed(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(DomainError::invalid_id(format!("EntityId: malformed '{raw}'")))
        }
    }

    pub fn is_well_formed(raw: &str) -> bool {
        let Some((domain, object)) = raw.split_once('.') else {
            return false;
        };
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        };
        valid(domain) && valid(object)
    }

    /// The part before the first `.` (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map(|(d, _)| d).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
