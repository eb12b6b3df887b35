//! Write-time conflict detection between endpoint patterns.
//!
//! Overlap detection is a heuristic: it can miss real overlaps or report false
//! ones for patterns with several staggered wildcards. It only guards the
//! write path. At request time the dispatcher's specificity ordering decides.

use crate::model::EndpointId;
use crate::pattern::Pattern;
use crate::rules::Rule;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Substituted for every wildcard when probing one pattern with the other.
pub const SAMPLE_PLACEHOLDER: &str = "test";

/// Whether some concrete URL could satisfy both patterns.
pub fn overlaps(a: &Pattern, b: &Pattern) -> bool {
    if a == b || a.is_catch_all() || b.is_catch_all() {
        return true;
    }

    if b.matches(&a.sample(SAMPLE_PLACEHOLDER)) || a.matches(&b.sample(SAMPLE_PLACEHOLDER)) {
        return true;
    }

    // "https://api.com/*" and "https://api.com/users/*"
    let (prefix_a, prefix_b) = (a.literal_prefix(), b.literal_prefix());
    !prefix_a.is_empty()
        && !prefix_b.is_empty()
        && (prefix_a.starts_with(prefix_b) || prefix_b.starts_with(prefix_a))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same specificity: the dispatcher could not tell the two apart.
    Exact,
    /// The new pattern is more specific and wins for the shared URLs.
    Overrides,
    /// The existing pattern is more specific and keeps winning.
    Overridden,
}

pub fn classify(new: &Pattern, existing: &Pattern) -> ConflictKind {
    match new.specificity().cmp(&existing.specificity()) {
        Ordering::Equal => ConflictKind::Exact,
        Ordering::Greater => ConflictKind::Overrides,
        Ordering::Less => ConflictKind::Overridden,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub endpoint_id: EndpointId,
    pub endpoint_name: String,
    pub url_pattern: String,
    pub kind: ConflictKind,
    pub new_specificity: usize,
    pub existing_specificity: usize,
}

impl Conflict {
    pub fn is_blocking(&self) -> bool {
        self.kind == ConflictKind::Exact
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.endpoint_name;
        let id = self.endpoint_id;
        match self.kind {
            ConflictKind::Exact => write!(
                f,
                "matches the same URLs as endpoint {name:?} (#{id}) with equal specificity"
            ),
            ConflictKind::Overrides => {
                write!(f, "overrides endpoint {name:?} (#{id}) for matching URLs")
            }
            ConflictKind::Overridden => {
                write!(f, "is overridden by endpoint {name:?} (#{id}) for matching URLs")
            }
        }
    }
}

/// Classifies every active rule that overlaps `candidate`.
///
/// `exclude` skips the rule being edited so it is not compared with its own
/// previous version.
pub fn validate<'a, I>(candidate: &Pattern, rules: I, exclude: Option<EndpointId>) -> Vec<Conflict>
where
    I: IntoIterator<Item = &'a Rule>,
{
    rules
        .into_iter()
        .filter(|rule| rule.is_active() && Some(rule.id()) != exclude)
        .filter(|rule| overlaps(candidate, rule.pattern()))
        .map(|rule| Conflict {
            endpoint_id: rule.id(),
            endpoint_name: rule.endpoint().spec.name.clone(),
            url_pattern: rule.pattern().as_str().to_string(),
            kind: classify(candidate, rule.pattern()),
            new_specificity: candidate.specificity(),
            existing_specificity: rule.pattern().specificity(),
        })
        .collect()
}
