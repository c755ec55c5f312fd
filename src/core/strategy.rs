use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Failure policy applied when the dedupe cache cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DedupeStrategy {
    /// Fail closed: treat the message as a duplicate and skip it.
    Strict,
    /// Fail open: treat the message as new and process it.
    #[default]
    Relaxed,
}

impl DedupeStrategy {
    /// Verdict returned by `found_duplicate` when the cache call failed.
    #[inline]
    pub fn verdict_on_failure(self) -> bool {
        matches!(self, DedupeStrategy::Strict)
    }

    /// Human readable decision used in the error log.
    pub fn decision(self) -> &'static str {
        match self {
            DedupeStrategy::Strict => "assuming message is a duplicate",
            DedupeStrategy::Relaxed => "assuming message is not a duplicate",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DedupeStrategy::Strict => "strict",
            DedupeStrategy::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for DedupeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupeStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DedupeStrategy::Strict),
            "relaxed" => Ok(DedupeStrategy::Relaxed),
            other => Err(ConfigError::Parse(format!(
                "dedupe_strategy: expected `strict` or `relaxed`, got `{other}`"
            ))),
        }
    }
}
