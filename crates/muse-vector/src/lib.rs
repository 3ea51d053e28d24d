//! Embedding vector primitives for muse.
//!
//! This crate provides the shared vocabulary of the similarity engine:
//!
//! - **ArtworkId**: opaque, ordered artwork identifier
//! - **Embedding**: fixed-dimension, unit-normalized vector
//! - **Similarity functions**: dot product and cosine distance over unit
//!   vectors
//! - **SearchHit**: a (id, distance) pair with deterministic ordering
//!
//! Embeddings are normalized to unit length at construction, so cosine
//! similarity reduces to a plain dot product everywhere downstream.
//!
//! # Example
//!
//! ```
//! use muse_vector::{cosine_distance, Embedding};
//!
//! let a = Embedding::normalized(vec![3.0, 4.0]).unwrap();
//! let b = Embedding::normalized(vec![3.0, 4.0]).unwrap();
//! assert!(cosine_distance(a.as_slice(), b.as_slice()) < 1e-6);
//! ```

mod embedding;
mod id;
mod similarity;

pub use embedding::Embedding;
pub use id::ArtworkId;
pub use similarity::{cosine_distance, dot, SearchHit};

/// Error type for vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;
