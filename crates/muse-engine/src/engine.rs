//! The similarity engine.

use crate::config::EngineConfig;
use crate::sampler::SeedSampler;
use crate::{EngineError, Result};
use muse_cache::{ResultCache, SweeperHandle};
use muse_hnsw::{CompactionStats, HnswIndex};
use muse_observe::{Counter as _, EngineEvent, IndexEvt, Meter, NoopMeter, QueryEvt};
use muse_store::{filter_fingerprint, ArtworkStore, TagFilter, TagSet};
use muse_vector::{ArtworkId, Embedding};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One ranked similarity result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// The similar artwork.
    pub id: ArtworkId,
    /// Cosine similarity to the seed (higher = more similar).
    pub score: f32,
}

/// Ranked neighbors, best first, at most the requested `k`.
pub type QueryResult = Vec<Neighbor>;

/// Cache key for a similarity query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    seed: ArtworkId,
    k: usize,
    filters: u64,
}

/// Runtime counters exposed by [`SimilarityEngine::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    /// Active (non-deleted) records.
    pub active_records: usize,
    /// All records, including logically deleted ones.
    pub total_records: usize,
    /// Fraction of index nodes that are tombstones.
    pub tombstone_ratio: f32,
    /// Result cache hit ratio so far.
    pub cache_hit_ratio: f32,
}

/// The similarity retrieval engine.
///
/// Owns the vector store, the ANN index, the result cache and the seed
/// sampler. All methods take `&self` and are safe to call from any number
/// of threads; ingestion (`put_vector`/`remove_vector`) is expected to be
/// much rarer than queries.
pub struct SimilarityEngine {
    config: EngineConfig,
    store: ArtworkStore,
    index: HnswIndex,
    cache: Arc<ResultCache<CacheKey, QueryResult>>,
    sampler: SeedSampler,
    meter: Arc<dyn Meter>,
    _sweeper: Option<SweeperHandle>,
}

impl std::fmt::Debug for SimilarityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SimilarityEngine {
    /// Create an empty engine.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_meter(config, Arc::new(NoopMeter))
    }

    /// Create an empty engine reporting through the given meter.
    pub fn with_meter(config: EngineConfig, meter: Arc<dyn Meter>) -> Result<Self> {
        config.validate()?;
        let store = ArtworkStore::new(config.dimension);
        let index = HnswIndex::new(config.dimension, config.index.clone());
        Self::assemble(config, store, index, meter)
    }

    pub(crate) fn assemble(
        config: EngineConfig,
        store: ArtworkStore,
        index: HnswIndex,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        let cache = Arc::new(ResultCache::with_meter(
            config.cache.cache_config(),
            Arc::clone(&meter),
        ));

        let sweeper = match cache.spawn_sweeper(config.cache.sweep_interval()) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "cache sweeper unavailable, relying on lazy expiry");
                None
            }
        };

        let sampler = SeedSampler::new(config.sampler.history);

        Ok(Self {
            config,
            store,
            index,
            cache,
            sampler,
            meter,
            _sweeper: sweeper,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingest a vector: normalizes, stores the record and indexes it.
    ///
    /// Re-ingesting an existing id replaces its record and index node.
    ///
    /// # Errors
    ///
    /// `Vector` for malformed input (wrong dimension, NaN/Inf, zero norm).
    pub fn put_vector(
        &self,
        id: impl Into<ArtworkId>,
        components: Vec<f32>,
        tags: TagSet,
    ) -> Result<()> {
        let id = id.into();
        let embedding = Embedding::normalized(components)?;

        self.store.put(id.clone(), embedding.clone(), tags)?;
        self.index.insert(&id, &embedding)?;

        self.meter.emit(EngineEvent::Index(IndexEvt::Insert {
            active: self.index.active_len(),
        }));
        tracing::debug!(artwork = %id, "vector ingested");
        Ok(())
    }

    /// Logically delete an artwork from store and index.
    ///
    /// Cached results may keep returning the id until their TTL runs out;
    /// that staleness is bounded and accepted. Crossing the tombstone
    /// threshold triggers an inline compaction.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is unknown or already deleted.
    pub fn remove_vector(&self, id: &ArtworkId) -> Result<()> {
        let in_store = self.store.remove(id);
        let in_index = self.index.remove(id);
        if !in_store && !in_index {
            return Err(EngineError::NotFound(id.clone()));
        }

        self.meter.emit(EngineEvent::Index(IndexEvt::Tombstone {
            tombstone_ratio: self.index.tombstone_ratio(),
        }));
        tracing::debug!(artwork = %id, "vector removed");

        if self.index.needs_compaction() {
            self.compact();
        }
        Ok(())
    }

    /// Pick a random starting artwork for exploration.
    ///
    /// # Errors
    ///
    /// `EmptyCollection` when no active artwork exists.
    pub fn seed(&self) -> Result<ArtworkId> {
        match self.sampler.sample(&self.store) {
            Some(id) => {
                self.meter.emit(EngineEvent::Query(QueryEvt::Seed));
                Ok(id)
            }
            None => Err(EngineError::EmptyCollection),
        }
    }

    /// Retrieve the `k` artworks most similar to `seed`, best first.
    ///
    /// The seed itself never appears in its own results. With tag filters,
    /// candidates are over-fetched and post-filtered; attrition below `k`
    /// yields a shorter list rather than an error.
    ///
    /// # Errors
    ///
    /// `NotFound` when the seed is unknown or deleted.
    pub fn similar(&self, seed: &ArtworkId, k: usize, filters: &[TagFilter]) -> Result<QueryResult> {
        let embedding = self
            .store
            .embedding(seed)
            .ok_or_else(|| EngineError::NotFound(seed.clone()))?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let key = CacheKey {
            seed: seed.clone(),
            k,
            filters: filter_fingerprint(filters),
        };

        let mut cached = true;
        let result = self.cache.get_or_compute(key, || {
            cached = false;
            self.query_index(seed, &embedding, k, filters)
        })?;

        self.meter.emit(EngineEvent::Query(QueryEvt::Similar {
            k,
            returned: result.len(),
            cached,
        }));
        Ok(result)
    }

    /// The uncached query path: index search plus tag post-filtering.
    fn query_index(
        &self,
        seed: &ArtworkId,
        embedding: &Embedding,
        k: usize,
        filters: &[TagFilter],
    ) -> Result<QueryResult> {
        muse_observe::obs_count!(self.meter, "engine_index_searches", &[], 1);

        let fetch = if filters.is_empty() {
            k
        } else {
            k.saturating_mul(self.config.filter_overfetch)
        };
        let exclude: HashSet<ArtworkId> = std::iter::once(seed.clone()).collect();

        let hits = self.index.search(embedding, fetch, &exclude)?;

        let mut result = Vec::with_capacity(k.min(hits.len()));
        for hit in hits {
            if filters.is_empty() {
                // A record can be deleted between index search and here.
                if !self.store.contains_active(&hit.id) {
                    continue;
                }
            } else {
                let tags = match self.store.tags(&hit.id) {
                    Some(tags) => tags,
                    None => continue,
                };
                if !filters.iter().all(|f| f.matches(&tags)) {
                    continue;
                }
            }

            let score = hit.similarity();
            result.push(Neighbor { id: hit.id, score });
            if result.len() >= k {
                break;
            }
        }

        Ok(result)
    }

    /// Rebuild the index without tombstones.
    pub fn compact(&self) -> CompactionStats {
        self.meter.emit(EngineEvent::Index(IndexEvt::CompactionStart {
            nodes: self.index.len(),
            tombstones: self.index.len() - self.index.active_len(),
        }));

        let stats = self.index.compact();

        self.meter.emit(EngineEvent::Index(IndexEvt::CompactionFinish {
            nodes_before: stats.nodes_before,
            nodes_after: stats.nodes_after,
        }));
        stats
    }

    /// Runtime counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_records: self.store.active_len(),
            total_records: self.store.len(),
            tombstone_ratio: self.index.tombstone_ratio(),
            cache_hit_ratio: self.cache.hit_ratio(),
        }
    }

    pub(crate) fn store(&self) -> &ArtworkStore {
        &self.store
    }

    pub(crate) fn index(&self) -> &HnswIndex {
        &self.index
    }
}
