//! Exclusion filters for prefixes and bucket names.

use regex::Regex;

use crate::config::ConfigError;

/// Ordered set of compiled exclusion patterns.
///
/// A candidate is excluded when any pattern matches it; patterns are
/// unanchored, so `^tmp` must be written explicitly to match only at the start.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    patterns: Vec<Regex>,
}

impl Filter {
    /// Compiles `patterns`, failing on the first invalid one.
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns `true` if any pattern matches `candidate`.
    pub fn is_excluded(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(candidate))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
