//! Canonical artwork vector store.
//!
//! The store owns the mapping from [`ArtworkId`] to [`VectorRecord`]
//! (embedding + metadata tags). It is append-only with logical deletion:
//! records are created once at ingestion and immutable afterwards except
//! for the deleted flag. The ANN index and cache hold no record state of
//! their own; they always resolve against this store.
//!
//! The store also maintains a dense active-id list so the seed sampler can
//! draw uniformly in O(1) without scanning.

mod record;
mod store;
mod tags;

pub use record::VectorRecord;
pub use store::ArtworkStore;
pub use tags::{filter_fingerprint, TagField, TagFilter, TagOp, TagSet};

use muse_vector::{ArtworkId, VectorError};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("duplicate record: {0}")]
    DuplicateRecord(ArtworkId),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
