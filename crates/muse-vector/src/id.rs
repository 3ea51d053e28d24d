//! Artwork identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable artwork identifier.
///
/// Ids are museum-qualified strings such as `met/436535`. The engine never
/// interprets their contents; it only relies on equality, hashing and the
/// lexicographic order used to break similarity ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtworkId(String);

impl ArtworkId {
    /// Create a new artwork id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtworkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ArtworkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
