//! Vector records.

use crate::tags::TagSet;
use muse_vector::{ArtworkId, Embedding};
use serde::{Deserialize, Serialize};

/// One artwork's canonical entry: embedding plus metadata tags.
///
/// Owned exclusively by the [`ArtworkStore`](crate::ArtworkStore). Created
/// at ingestion and immutable afterwards except for the deleted flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: ArtworkId,
    pub embedding: Embedding,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub deleted: bool,
}

impl VectorRecord {
    /// Create a new active record.
    pub fn new(id: impl Into<ArtworkId>, embedding: Embedding, tags: TagSet) -> Self {
        Self {
            id: id.into(),
            embedding,
            tags,
            deleted: false,
        }
    }
}
