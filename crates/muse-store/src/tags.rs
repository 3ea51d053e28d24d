//! Metadata tags and post-retrieval filters.
//!
//! Tags follow a fixed schema of optional typed fields rather than an open
//! key/value bag; filters are a closed set of (field, operator, value)
//! triples evaluated against retrieved candidates.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Metadata tags attached to an artwork at ingestion.
///
/// Fields mirror the common classification block of museum catalog records
/// (e.g. the Met's `medium` / `period` / `culture`). All are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub culture: Option<String>,
}

impl TagSet {
    /// Value of a single field, if present.
    pub fn field(&self, field: TagField) -> Option<&str> {
        match field {
            TagField::Medium => self.medium.as_deref(),
            TagField::Period => self.period.as_deref(),
            TagField::Culture => self.culture.as_deref(),
        }
    }
}

/// The closed set of filterable tag fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagField {
    Medium,
    Period,
    Culture,
}

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOp {
    Equals,
    NotEquals,
}

/// A single tag predicate. A list of filters is conjunctive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagFilter {
    pub field: TagField,
    pub op: TagOp,
    pub value: String,
}

impl TagFilter {
    /// Create a new filter.
    pub fn new(field: TagField, op: TagOp, value: impl Into<String>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    /// Evaluate this predicate against a tag set.
    ///
    /// `Equals` requires the field to be present with the exact value;
    /// `NotEquals` matches absent fields as well as differing values.
    pub fn matches(&self, tags: &TagSet) -> bool {
        let actual = tags.field(self.field);
        match self.op {
            TagOp::Equals => actual == Some(self.value.as_str()),
            TagOp::NotEquals => actual != Some(self.value.as_str()),
        }
    }
}

/// Stable 64-bit fingerprint of a filter list, independent of ordering.
///
/// Feeds the cache key so that `[a, b]` and `[b, a]` share an entry.
pub fn filter_fingerprint(filters: &[TagFilter]) -> u64 {
    let mut sorted: Vec<&TagFilter> = filters.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = DefaultHasher::new();
    sorted.len().hash(&mut hasher);
    for f in sorted {
        f.hash(&mut hasher);
    }
    hasher.finish()
}
