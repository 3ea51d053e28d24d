//! HNSW (Hierarchical Navigable Small World) index for muse.
//!
//! Approximate nearest-neighbor search over artwork embeddings. HNSW builds
//! a multi-layer proximity graph where:
//!
//! - Higher layers have fewer nodes (geometric decay)
//! - Each layer is a navigable small-world graph
//! - Search descends from the top layer, then runs a bounded beam at the base
//!
//! Deletion is logical: removed artworks become tombstones that keep
//! routing traffic through the graph but never appear in results. When the
//! tombstone ratio crosses a threshold the index is rebuilt without them
//! ([`HnswIndex::compact`]).
//!
//! # Parameters
//!
//! - `m`: max connections per node per layer (default: 16)
//! - `ef_construction`: beam width while building (default: 200)
//! - `ef_search`: beam width while searching (default: 100)
//!
//! # Example
//!
//! ```
//! use muse_hnsw::{HnswConfig, HnswIndex};
//! use muse_vector::Embedding;
//! use std::collections::HashSet;
//!
//! let index = HnswIndex::new(4, HnswConfig::default());
//!
//! let a = Embedding::normalized(vec![1.0, 0.0, 0.0, 0.0]).unwrap();
//! let b = Embedding::normalized(vec![0.9, 0.1, 0.0, 0.0]).unwrap();
//! index.insert(&"met/1".into(), &a).unwrap();
//! index.insert(&"met/2".into(), &b).unwrap();
//!
//! let hits = index.search(&a, 1, &HashSet::new()).unwrap();
//! assert_eq!(hits[0].id.as_str(), "met/1");
//! ```

mod graph;
mod index;
mod snapshot;

pub use index::{CompactionStats, HnswConfig, HnswIndex};
pub use snapshot::{HnswSnapshot, NodeSnapshot};

/// Error type for index operations.
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("vector error: {0}")]
    Vector(#[from] muse_vector::VectorError),

    #[error("graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, HnswError>;
