//! Engine checkpoint and restore.
//!
//! A checkpoint is enough to reconstruct the engine without replaying
//! ingestion: embedding dimension, every active record, and the index
//! graph topology. Serialized with bincode.

use crate::config::EngineConfig;
use crate::engine::SimilarityEngine;
use crate::{EngineError, Result};
use muse_hnsw::{HnswIndex, HnswSnapshot};
use muse_observe::{Meter, NoopMeter};
use muse_store::{ArtworkStore, VectorRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

/// Serializable engine state.
#[derive(Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub dimension: usize,
    pub records: Vec<VectorRecord>,
    pub index: HnswSnapshot,
}

impl SimilarityEngine {
    /// Write the engine state to a file.
    ///
    /// Compacts the index first when tombstones are present, so the
    /// persisted topology references only live records.
    pub fn checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.index().len() != self.index().active_len() {
            self.compact();
        }

        let snapshot = EngineSnapshot {
            dimension: self.config().dimension,
            records: self.store().active_records(),
            index: self.index().snapshot(),
        };

        let file = File::create(path.as_ref())
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        bincode::serialize_into(BufWriter::new(file), &snapshot)
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;

        tracing::info!(
            path = %path.as_ref().display(),
            records = snapshot.records.len(),
            "engine checkpoint written"
        );
        Ok(())
    }

    /// Rebuild an engine from a checkpoint file.
    pub fn restore<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        Self::restore_with_meter(path, config, Arc::new(NoopMeter))
    }

    /// Rebuild an engine from a checkpoint file, reporting through `meter`.
    ///
    /// # Errors
    ///
    /// `Config` when the checkpoint's dimension disagrees with the
    /// configuration; `Checkpoint` for unreadable files; `Index` when the
    /// persisted topology is inconsistent with the records.
    pub fn restore_with_meter<P: AsRef<Path>>(
        path: P,
        config: EngineConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        config.validate()?;

        let file = File::open(path.as_ref())
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        let snapshot: EngineSnapshot = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;

        if snapshot.dimension != config.dimension {
            return Err(EngineError::Config(format!(
                "checkpoint dimension {} does not match configured dimension {}",
                snapshot.dimension, config.dimension
            )));
        }

        let store = ArtworkStore::from_records(snapshot.dimension, snapshot.records)?;
        let index = HnswIndex::from_snapshot(snapshot.index, |id| store.embedding(id))?;

        tracing::info!(
            path = %path.as_ref().display(),
            records = store.active_len(),
            "engine restored from checkpoint"
        );
        Self::assemble(config, store, index, meter)
    }
}
