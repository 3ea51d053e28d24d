//! End-to-end tests for the similarity engine.

use muse_engine::{EngineConfig, EngineError, SimilarityEngine};
use muse_observe::{Counter, EngineEvent, Gauge, Histogram, Meter};
use muse_store::{TagField, TagFilter, TagOp, TagSet};
use muse_vector::ArtworkId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use tempfile::TempDir;

/// Meter that tallies counter increments per metric name.
#[derive(Default)]
struct CountingMeter {
    counters: Mutex<HashMap<&'static str, Arc<AtomicU64>>>,
}

impl CountingMeter {
    fn count(&self, name: &'static str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn cell(&self, name: &'static str) -> Arc<AtomicU64> {
        Arc::clone(
            self.counters
                .lock()
                .unwrap()
                .entry(name)
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }
}

struct SharedCounter(Arc<AtomicU64>);
impl Counter for SharedCounter {
    fn inc(&self, v: u64) {
        self.0.fetch_add(v, Ordering::SeqCst);
    }
}
struct NoGauge;
impl Gauge for NoGauge {
    fn set(&self, _v: i64) {}
}
struct NoHistogram;
impl Histogram for NoHistogram {
    fn observe(&self, _v: f64) {}
}

impl Meter for CountingMeter {
    fn counter(
        &self,
        name: &'static str,
        _labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(SharedCounter(self.cell(name)))
    }
    fn gauge(
        &self,
        _name: &'static str,
        _labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoGauge)
    }
    fn histo(
        &self,
        _name: &'static str,
        _buckets: &'static [f64],
        _labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoHistogram)
    }
    fn emit(&self, _evt: EngineEvent) {}
}

fn small_config(dimension: usize) -> EngineConfig {
    let mut config = EngineConfig::new(dimension);
    config.index.m = 8;
    config.index.m_max0 = 16;
    config.index.ef_construction = 50;
    config.index.ef_search = 50;
    config.index.max_layers = 8;
    config
}

fn id(s: &str) -> ArtworkId {
    ArtworkId::from(s)
}

/// Five artworks with hand-picked similarities to v1.
fn five_vector_engine() -> SimilarityEngine {
    let engine = SimilarityEngine::new(small_config(4)).unwrap();
    engine
        .put_vector("met/v1", vec![1.0, 0.0, 0.0, 0.0], TagSet::default())
        .unwrap();
    engine
        .put_vector("met/v2", vec![0.9, 0.1, 0.0, 0.0], TagSet::default())
        .unwrap();
    engine
        .put_vector("met/v3", vec![0.7, 0.7, 0.0, 0.0], TagSet::default())
        .unwrap();
    engine
        .put_vector("met/v4", vec![0.0, 1.0, 0.0, 0.0], TagSet::default())
        .unwrap();
    engine
        .put_vector("met/v5", vec![-1.0, 0.0, 0.0, 0.0], TagSet::default())
        .unwrap();
    engine
}

fn spread_engine(n: usize) -> SimilarityEngine {
    let engine = SimilarityEngine::new(small_config(8)).unwrap();
    for i in 0..n {
        let components: Vec<f32> = (0..8).map(|j| ((i * 8 + j) as f32 * 0.53).sin()).collect();
        engine
            .put_vector(format!("met/{i}"), components, TagSet::default())
            .unwrap();
    }
    engine
}

#[test]
fn test_known_neighbors_ranked_by_similarity() {
    let engine = five_vector_engine();

    let result = engine.similar(&id("met/v1"), 2, &[]).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[0].id.as_str(), "met/v2");
    assert_eq!(result[1].id.as_str(), "met/v3");
    assert!(result[0].score > result[1].score);
    assert!(result[0].score > 0.99);
    assert!((result[1].score - 0.707).abs() < 0.01);
}

#[test]
fn test_seed_never_returned_as_its_own_neighbor() {
    let engine = five_vector_engine();

    let result = engine.similar(&id("met/v1"), 10, &[]).unwrap();
    assert!(result.iter().all(|n| n.id.as_str() != "met/v1"));
    assert_eq!(result.len(), 4); // everything else, k exceeds active count
}

#[test]
fn test_unknown_seed_is_not_found() {
    let engine = five_vector_engine();

    let err = engine.similar(&id("met/nope"), 3, &[]).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn test_removed_seed_is_not_found_and_disappears_from_neighbors() {
    let engine = spread_engine(12);

    engine.remove_vector(&id("met/4")).unwrap();

    let err = engine.similar(&id("met/4"), 3, &[]).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    // Fresh query for another seed: the removed id must be gone.
    let result = engine.similar(&id("met/0"), 11, &[]).unwrap();
    assert!(result.iter().all(|n| n.id.as_str() != "met/4"));
}

#[test]
fn test_remove_unknown_id_is_not_found() {
    let engine = spread_engine(3);
    let err = engine.remove_vector(&id("met/99")).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn test_cached_results_stay_stale_until_ttl() {
    // Removal does not invalidate cached results; staleness is bounded by
    // the TTL. This pins the documented trade-off.
    let engine = spread_engine(10);

    let before = engine.similar(&id("met/0"), 3, &[]).unwrap();
    let victim = before[0].id.clone();

    engine.remove_vector(&victim).unwrap();

    let after = engine.similar(&id("met/0"), 3, &[]).unwrap();
    assert_eq!(before, after); // served from cache, victim included
}

#[test]
fn test_double_insert_does_not_duplicate_results() {
    let engine = five_vector_engine();
    engine
        .put_vector("met/v2", vec![0.9, 0.1, 0.0, 0.0], TagSet::default())
        .unwrap();

    let result = engine.similar(&id("met/v1"), 10, &[]).unwrap();
    let v2_count = result.iter().filter(|n| n.id.as_str() == "met/v2").count();
    assert_eq!(v2_count, 1);

    let stats = engine.stats();
    assert_eq!(stats.active_records, 5);
}

#[test]
fn test_k_monotonicity_and_prefix() {
    let engine = spread_engine(30);
    let seed = id("met/7");

    let small = engine.similar(&seed, 3, &[]).unwrap();
    let large = engine.similar(&seed, 9, &[]).unwrap();

    assert!(large.len() >= small.len());
    for (s, l) in small.iter().zip(large.iter()) {
        assert_eq!(s.id, l.id);
    }

    for pair in large.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_zero_k_returns_empty() {
    let engine = five_vector_engine();
    let result = engine.similar(&id("met/v1"), 0, &[]).unwrap();
    assert!(result.is_empty());
}

#[test]
fn test_empty_engine_behavior() {
    let engine = SimilarityEngine::new(small_config(4)).unwrap();

    let err = engine.seed().unwrap_err();
    assert!(matches!(err, EngineError::EmptyCollection));

    let err = engine.similar(&id("met/v1"), 3, &[]).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn test_dimension_mismatch_rejected_at_ingestion() {
    let engine = SimilarityEngine::new(small_config(4)).unwrap();
    let err = engine
        .put_vector("met/bad", vec![1.0, 0.0], TagSet::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_) | EngineError::Vector(_)));
}

#[test]
fn test_tag_filters_post_filter_results() {
    let engine = SimilarityEngine::new(small_config(4)).unwrap();

    for i in 0..9usize {
        let medium = if i % 3 == 0 { "Oil on canvas" } else { "Bronze" };
        let tags = TagSet {
            medium: Some(medium.to_string()),
            period: None,
            culture: None,
        };
        let components: Vec<f32> = (0..4).map(|j| ((i * 4 + j) as f32 * 0.61).cos()).collect();
        engine.put_vector(format!("met/{i}"), components, tags).unwrap();
    }

    let oil = vec![TagFilter::new(TagField::Medium, TagOp::Equals, "Oil on canvas")];
    let result = engine.similar(&id("met/1"), 5, &oil).unwrap();

    // Only met/0, met/3, met/6 qualify (met/1 is the seed and excluded
    // anyway): best-effort shorter list, never an error.
    assert!(!result.is_empty());
    assert!(result.len() <= 3);
    for neighbor in &result {
        let suffix: usize = neighbor.id.as_str()["met/".len()..].parse().unwrap();
        assert_eq!(suffix % 3, 0);
    }
}

#[test]
fn test_herd_collapse_issues_single_index_search() {
    let meter = Arc::new(CountingMeter::default());
    let engine = Arc::new(
        SimilarityEngine::with_meter(small_config(8), Arc::clone(&meter) as Arc<dyn Meter>)
            .unwrap(),
    );

    for i in 0..20usize {
        let components: Vec<f32> = (0..8).map(|j| ((i * 8 + j) as f32 * 0.53).sin()).collect();
        engine
            .put_vector(format!("met/{i}"), components, TagSet::default())
            .unwrap();
    }
    assert_eq!(meter.count("engine_index_searches"), 0);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                engine.similar(&ArtworkId::from("met/3"), 5, &[]).unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // One index query, identical results for every caller.
    assert_eq!(meter.count("engine_index_searches"), 1);
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
}

#[test]
fn test_seed_sampling_covers_collection_without_quick_repeats() {
    let mut config = small_config(4);
    config.sampler.history = 5;
    let engine = SimilarityEngine::new(config).unwrap();

    for i in 0..10usize {
        let components: Vec<f32> = (0..4).map(|j| ((i * 4 + j) as f32 * 0.77).sin()).collect();
        engine
            .put_vector(format!("met/{i}"), components, TagSet::default())
            .unwrap();
    }

    let seeds: Vec<ArtworkId> = (0..1000).map(|_| engine.seed().unwrap()).collect();

    for window in seeds.windows(5) {
        let unique: HashSet<&ArtworkId> = window.iter().collect();
        assert_eq!(unique.len(), window.len());
    }

    let distinct: HashSet<&ArtworkId> = seeds.iter().collect();
    assert_eq!(distinct.len(), 10);
}

#[test]
fn test_checkpoint_restore_roundtrip() {
    let engine = spread_engine(30);
    engine.remove_vector(&id("met/11")).unwrap();
    engine.remove_vector(&id("met/23")).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.ckpt");
    engine.checkpoint(&path).unwrap();

    let restored = SimilarityEngine::restore(&path, small_config(8)).unwrap();

    let original_stats = engine.stats();
    let restored_stats = restored.stats();
    assert_eq!(restored_stats.active_records, original_stats.active_records);
    assert_eq!(restored_stats.active_records, 28);

    for seed in ["met/0", "met/7", "met/29"] {
        let original = engine.similar(&id(seed), 6, &[]).unwrap();
        let restored_result = restored.similar(&id(seed), 6, &[]).unwrap();

        let original_ids: Vec<_> = original.iter().map(|n| n.id.clone()).collect();
        let restored_ids: Vec<_> = restored_result.iter().map(|n| n.id.clone()).collect();
        assert_eq!(original_ids, restored_ids);

        for (a, b) in original.iter().zip(restored_result.iter()) {
            assert!((a.score - b.score).abs() < 1e-5);
        }
    }
}

#[test]
fn test_restore_rejects_dimension_mismatch() {
    let engine = spread_engine(5);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.ckpt");
    engine.checkpoint(&path).unwrap();

    let err = SimilarityEngine::restore(&path, small_config(16)).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_heavy_removal_triggers_compaction() {
    let engine = spread_engine(20);

    for i in 0..8 {
        engine.remove_vector(&id(&format!("met/{i}"))).unwrap();
    }

    // 8 of 20 removed crosses the 0.2 tombstone threshold along the way,
    // so the inline compaction must have rebuilt the index; without it the
    // ratio would sit at 0.4.
    let stats = engine.stats();
    assert_eq!(stats.active_records, 12);
    assert!(stats.tombstone_ratio <= 0.2);

    let result = engine.similar(&id("met/15"), 20, &[]).unwrap();
    assert_eq!(result.len(), 11);
    assert!(result.iter().all(|n| {
        let suffix: usize = n.id.as_str()["met/".len()..].parse().unwrap();
        suffix >= 8
    }));
}
