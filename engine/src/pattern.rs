//! Wildcard URL patterns.
//!
//! A pattern is a string of literal characters and `*`, where `*` matches any
//! (possibly empty) run of characters. Matching is anchored at both ends and
//! literal segments are case-sensitive.

use crate::errors::PatternError;
use regex::Regex;
use std::fmt;

pub const WILDCARD: char = '*';

/// A compiled wildcard pattern together with its specificity.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
    specificity: usize,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }

        let body = source
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s:{body})$"))?;

        Ok(Self {
            source: source.to_string(),
            regex,
            specificity: specificity(source),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn specificity(&self) -> usize {
        self.specificity
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn is_catch_all(&self) -> bool {
        self.source.chars().all(|c| c == WILDCARD)
    }

    /// Literal text before the first wildcard (the whole pattern if it has none).
    pub fn literal_prefix(&self) -> &str {
        self.source
            .split(WILDCARD)
            .next()
            .unwrap_or(self.source.as_str())
    }

    /// Concrete string obtained by substituting `placeholder` for every wildcard.
    pub fn sample(&self, placeholder: &str) -> String {
        self.source.replace(WILDCARD, placeholder)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Number of non-wildcard characters. Higher means more specific; `"*"` is 0.
pub fn specificity(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c != WILDCARD).count()
}
