//! The artwork store.

use crate::record::VectorRecord;
use crate::tags::TagSet;
use crate::{Result, StoreError};
use muse_vector::{ArtworkId, Embedding};
use parking_lot::RwLock;
use std::collections::HashMap;

struct StoreInner {
    /// All records, including logically deleted ones.
    records: HashMap<ArtworkId, VectorRecord>,
    /// Dense list of active ids for O(1) uniform sampling.
    active: Vec<ArtworkId>,
    /// Position of each active id inside `active`.
    positions: HashMap<ArtworkId, usize>,
}

impl StoreInner {
    fn activate(&mut self, id: ArtworkId) {
        if !self.positions.contains_key(&id) {
            self.positions.insert(id.clone(), self.active.len());
            self.active.push(id);
        }
    }

    fn deactivate(&mut self, id: &ArtworkId) {
        if let Some(pos) = self.positions.remove(id) {
            self.active.swap_remove(pos);
            if let Some(moved) = self.active.get(pos) {
                self.positions.insert(moved.clone(), pos);
            }
        }
    }
}

/// Thread-safe store of artwork vector records.
///
/// Readers (query engine, sampler) take brief read locks; the ingestion
/// path takes the write lock. The embedding dimension is fixed at
/// construction and enforced on every put.
pub struct ArtworkStore {
    dimension: usize,
    inner: RwLock<StoreInner>,
}

impl ArtworkStore {
    /// Create an empty store for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(StoreInner {
                records: HashMap::new(),
                active: Vec::new(),
                positions: HashMap::new(),
            }),
        }
    }

    /// Rebuild a store from checkpointed records.
    ///
    /// Records are expected to be active; duplicate ids are rejected.
    pub fn from_records(dimension: usize, records: Vec<VectorRecord>) -> Result<Self> {
        let store = Self::new(dimension);
        {
            let mut inner = store.inner.write();
            for record in records {
                record.embedding.check_dim(dimension)?;
                if inner.records.contains_key(&record.id) {
                    return Err(StoreError::DuplicateRecord(record.id));
                }
                if !record.deleted {
                    inner.activate(record.id.clone());
                }
                inner.records.insert(record.id.clone(), record);
            }
        }
        Ok(store)
    }

    /// The fixed embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or update a record.
    ///
    /// A put for an existing id replaces its embedding and tags; a put for
    /// a logically deleted id revives it.
    pub fn put(&self, id: impl Into<ArtworkId>, embedding: Embedding, tags: TagSet) -> Result<()> {
        embedding.check_dim(self.dimension)?;
        let id = id.into();

        let mut inner = self.inner.write();
        inner.activate(id.clone());
        inner
            .records
            .insert(id.clone(), VectorRecord::new(id, embedding, tags));
        Ok(())
    }

    /// Logically delete a record.
    ///
    /// Returns `false` when the id is unknown or already deleted. The
    /// record stays in the store so checkpoints and the index can still
    /// resolve it until compaction.
    pub fn remove(&self, id: &ArtworkId) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(id) {
            Some(record) if !record.deleted => {
                record.deleted = true;
                inner.deactivate(id);
                true
            }
            _ => false,
        }
    }

    /// Embedding of an active record.
    pub fn embedding(&self, id: &ArtworkId) -> Option<Embedding> {
        let inner = self.inner.read();
        inner
            .records
            .get(id)
            .filter(|r| !r.deleted)
            .map(|r| r.embedding.clone())
    }

    /// Tags of an active record.
    pub fn tags(&self, id: &ArtworkId) -> Option<TagSet> {
        let inner = self.inner.read();
        inner
            .records
            .get(id)
            .filter(|r| !r.deleted)
            .map(|r| r.tags.clone())
    }

    /// Whether an id is present and active.
    pub fn contains_active(&self, id: &ArtworkId) -> bool {
        let inner = self.inner.read();
        inner.records.get(id).map(|r| !r.deleted).unwrap_or(false)
    }

    /// Number of active records.
    pub fn active_len(&self) -> usize {
        self.inner.read().active.len()
    }

    /// Total number of records, including deleted ones.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store holds no active records.
    pub fn is_empty(&self) -> bool {
        self.active_len() == 0
    }

    /// The n-th active id, modulo the active count.
    ///
    /// Sampling support: callers draw a random index and map it through
    /// this accessor under a single read lock, so a concurrent removal
    /// can never push the index out of bounds.
    pub fn nth_active(&self, n: usize) -> Option<ArtworkId> {
        let inner = self.inner.read();
        if inner.active.is_empty() {
            return None;
        }
        inner.active.get(n % inner.active.len()).cloned()
    }

    /// Snapshot of all active ids.
    pub fn active_ids(&self) -> Vec<ArtworkId> {
        self.inner.read().active.clone()
    }

    /// Clones of all active records, for checkpointing.
    pub fn active_records(&self) -> Vec<VectorRecord> {
        let inner = self.inner.read();
        inner
            .records
            .values()
            .filter(|r| !r.deleted)
            .cloned()
            .collect()
    }
}
