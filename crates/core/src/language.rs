//! Language tags
//!
//! Listeners subscribe by tag and the translator accepts arbitrary targets,
//! so this is an open newtype rather than a closed enum. Tags are normalized
//! to lowercase on construction (`ES` and `es` are the same language).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// A normalized (lowercase) language tag such as `es`, `fr`, or `zh-hans`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    /// Create a tag, normalizing case. Empty or whitespace-only input is
    /// rejected; anything else is accepted as-is after lowercasing.
    pub fn new(tag: impl AsRef<str>) -> Result<Self, CoreError> {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidLanguageTag(tag.as_ref().to_string()));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidLanguageTag(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase().replace('_', "-")))
    }

    /// The normalized tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary subtag (`zh-hans` -> `zh`), used for voice-table lookups.
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl FromStr for LanguageTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for LanguageTag {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
