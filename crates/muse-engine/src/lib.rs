//! Visual-similarity query engine for artwork collections.
//!
//! The engine ties the pieces together: the canonical vector store, the
//! HNSW index, the TTL'd result cache and the seed sampler. One structure,
//! [`SimilarityEngine`], owns the whole lifecycle: constructed empty or
//! from a checkpoint, mutated only through its ingestion contract, torn
//! down on drop.
//!
//! ```text
//! similar(seed, k, filters)
//!     └─ store: resolve seed embedding        (NotFound when unknown)
//!        └─ cache: (seed, k, filters) lookup  (herd-collapsed on miss)
//!           └─ index: beam search, seed excluded
//!              └─ store: tag post-filter, truncate to k
//! ```
//!
//! Searches are plain synchronous calls and scale across reader threads;
//! ingestion is the low-frequency writer path.

mod checkpoint;
mod config;
mod engine;
mod sampler;

pub use checkpoint::EngineSnapshot;
pub use config::{CacheSettings, EngineConfig, SamplerSettings};
pub use engine::{EngineStats, Neighbor, QueryResult, SimilarityEngine};
pub use sampler::SeedSampler;

use muse_vector::ArtworkId;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("artwork not found: {0}")]
    NotFound(ArtworkId),

    #[error("collection is empty")]
    EmptyCollection,

    #[error("vector error: {0}")]
    Vector(#[from] muse_vector::VectorError),

    #[error("store error: {0}")]
    Store(#[from] muse_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] muse_hnsw::HnswError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
