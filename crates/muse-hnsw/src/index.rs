//! HNSW index implementation.
//!
//! The whole graph (arena, per-layer adjacency, id map, entry point) lives
//! behind one `RwLock`: concurrent searches share read guards and never
//! block each other, while structural mutation takes the write guard as a
//! short exclusive section. Writers additionally serialize on a gate mutex
//! so compaction can rebuild the graph off to the side, with searches still
//! running against the old graph, and swap it in at the end.

use crate::graph::{random_layer, LayerState, Neighbors, Node, NodeId};
use crate::Result;
use muse_vector::{cosine_distance, ArtworkId, Embedding, SearchHit};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// HNSW tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Max connections per node per layer (M).
    #[serde(default = "default_m")]
    pub m: usize,

    /// Max connections at layer 0 (typically 2*M).
    #[serde(default = "default_m_max0")]
    pub m_max0: usize,

    /// Beam width during construction. Higher = better graph, slower build.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    /// Beam width during search. Higher = better recall, slower query.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,

    /// Maximum number of layers.
    #[serde(default = "default_max_layers")]
    pub max_layers: usize,

    /// Tombstone ratio above which [`HnswIndex::needs_compaction`] fires.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

fn default_m() -> usize {
    16
}
fn default_m_max0() -> usize {
    32
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    100
}
fn default_max_layers() -> usize {
    16
}
fn default_compaction_threshold() -> f32 {
    0.2
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            m_max0: default_m_max0(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            max_layers: default_max_layers(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

/// Candidate during beam search: (node, distance), ordered by ascending
/// distance with node id as the deterministic tie-break.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    node_id: NodeId,
    distance: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

/// The mutable graph state guarded by the index's `RwLock`.
pub(crate) struct GraphCore {
    pub(crate) nodes: Vec<Node>,
    pub(crate) id_map: HashMap<ArtworkId, NodeId>,
    pub(crate) layers: Vec<LayerState>,
    pub(crate) entry_point: Option<NodeId>,
    pub(crate) max_layer: usize,
}

impl GraphCore {
    pub(crate) fn new(config: &HnswConfig) -> Self {
        let layers = (0..config.max_layers)
            .map(|layer| {
                let max_degree = if layer == 0 { config.m_max0 } else { config.m };
                LayerState::new(max_degree)
            })
            .collect();

        Self {
            nodes: Vec::new(),
            id_map: HashMap::new(),
            layers,
            entry_point: None,
            max_layer: 0,
        }
    }

    fn distance_to(&self, query: &[f32], node_id: NodeId) -> f32 {
        match self.nodes.get(node_id as usize) {
            Some(node) => cosine_distance(query, node.vector.as_slice()),
            None => f32::MAX,
        }
    }

    /// Whether a node may be collected as a result.
    ///
    /// `filter: None` means routing mode: tombstones count too.
    fn eligible(&self, node_id: NodeId, filter: Option<&HashSet<ArtworkId>>) -> bool {
        match filter {
            None => true,
            Some(exclude) => match self.nodes.get(node_id as usize) {
                Some(node) => !node.deleted && !exclude.contains(&node.artwork_id),
                None => false,
            },
        }
    }

    /// Beam search within one layer.
    ///
    /// Returns up to `ef` eligible candidates sorted by ascending distance.
    /// Ineligible nodes (tombstones, excluded ids) are traversed for
    /// routing but never collected.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[NodeId],
        ef: usize,
        layer: usize,
        filter: Option<&HashSet<ArtworkId>>,
    ) -> Vec<Candidate> {
        // Min-heap frontier (closest first).
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        // Max-heap of collected results (furthest on top, for pruning).
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();

        for &ep in entries {
            if !visited.insert(ep) {
                continue;
            }
            let candidate = Candidate {
                node_id: ep,
                distance: self.distance_to(query, ep),
            };
            candidates.push(Reverse(candidate.clone()));
            if self.eligible(ep, filter) {
                results.push(candidate);
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            let neighbors = match self.layers.get(layer).and_then(|l| l.neighbors(current.node_id)) {
                Some(n) => n,
                None => continue,
            };

            for &neighbor_id in neighbors.iter() {
                if !visited.insert(neighbor_id) {
                    continue;
                }

                let distance = self.distance_to(query, neighbor_id);
                let worst = if results.len() >= ef {
                    results.peek().map(|w| w.distance).unwrap_or(f32::MAX)
                } else {
                    f32::MAX
                };
                if distance >= worst {
                    continue;
                }

                let candidate = Candidate {
                    node_id: neighbor_id,
                    distance,
                };
                candidates.push(Reverse(candidate.clone()));
                if self.eligible(neighbor_id, filter) {
                    results.push(candidate);
                    while results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().collect();
        out.sort();
        out
    }

    /// Insert a new node and wire it into every layer it participates in.
    pub(crate) fn insert(
        &mut self,
        artwork_id: ArtworkId,
        vector: Embedding,
        config: &HnswConfig,
    ) -> NodeId {
        let node_layer = random_layer(config.m, config.max_layers);
        let query = vector.clone();

        let node_id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            artwork_id: artwork_id.clone(),
            vector,
            max_layer: node_layer,
            deleted: false,
        });
        self.id_map.insert(artwork_id, node_id);

        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => {
                // First node becomes the entry point on all its layers.
                self.entry_point = Some(node_id);
                self.max_layer = node_layer;
                for layer in 0..=node_layer {
                    if let Some(state) = self.layers.get_mut(layer) {
                        state.set_neighbors(node_id, Neighbors::new());
                    }
                }
                return node_id;
            }
        };

        let current_max = self.max_layer;
        let mut ep = vec![entry_point];

        // Greedy descent through layers above the node's top layer.
        for layer in (node_layer + 1..=current_max).rev() {
            let candidates = self.search_layer(query.as_slice(), &ep, 1, layer, None);
            if let Some(best) = candidates.first() {
                ep = vec![best.node_id];
            }
        }

        // Connect on each layer the node participates in.
        for layer in (0..=node_layer.min(current_max)).rev() {
            let candidates =
                self.search_layer(query.as_slice(), &ep, config.ef_construction, layer, None);

            let m = if layer == 0 { config.m_max0 } else { config.m };
            let chosen: Vec<NodeId> = candidates.iter().take(m).map(|c| c.node_id).collect();

            if let Some(state) = self.layers.get_mut(layer) {
                state.set_neighbors(node_id, Neighbors::new());
            }
            self.connect(node_id, &chosen, layer);

            if let Some(best) = candidates.first() {
                ep = vec![best.node_id];
            }
        }

        // A node drawn above the current top layer becomes the new entry.
        if node_layer > current_max {
            for layer in (current_max + 1)..=node_layer {
                if let Some(state) = self.layers.get_mut(layer) {
                    state.set_neighbors(node_id, Neighbors::new());
                }
            }
            self.entry_point = Some(node_id);
            self.max_layer = node_layer;
        }

        node_id
    }

    /// Add bidirectional edges and re-trim any neighbor over the degree
    /// bound, keeping its closest links.
    fn connect(&mut self, node_id: NodeId, neighbors: &[NodeId], layer: usize) {
        let max_degree = match self.layers.get(layer) {
            Some(state) => state.max_degree(),
            None => return,
        };

        if let Some(state) = self.layers.get_mut(layer) {
            for &neighbor_id in neighbors {
                state.add_edge(node_id, neighbor_id);
            }
        }

        for &neighbor_id in neighbors {
            let over = self
                .layers
                .get(layer)
                .and_then(|l| l.neighbors(neighbor_id))
                .map(|n| n.len() > max_degree)
                .unwrap_or(false);
            if !over {
                continue;
            }

            let base = match self.nodes.get(neighbor_id as usize) {
                Some(node) => node.vector.clone(),
                None => continue,
            };

            let mut scored: Vec<Candidate> = match self
                .layers
                .get(layer)
                .and_then(|l| l.neighbors(neighbor_id))
            {
                Some(links) => links
                    .iter()
                    .filter_map(|&link_id| {
                        self.nodes.get(link_id as usize).map(|link| Candidate {
                            node_id: link_id,
                            distance: cosine_distance(base.as_slice(), link.vector.as_slice()),
                        })
                    })
                    .collect(),
                None => continue,
            };

            scored.sort();
            let trimmed: Neighbors = scored.into_iter().take(max_degree).map(|c| c.node_id).collect();
            if let Some(state) = self.layers.get_mut(layer) {
                state.set_neighbors(neighbor_id, trimmed);
            }
        }
    }

    /// Tombstone a node: dropped from the id map and from results, but its
    /// edges keep routing until compaction.
    pub(crate) fn tombstone(&mut self, id: &ArtworkId) -> bool {
        match self.id_map.remove(id) {
            Some(node_id) => {
                if let Some(node) = self.nodes.get_mut(node_id as usize) {
                    node.deleted = true;
                }
                true
            }
            None => false,
        }
    }

    /// Full top-down search: greedy descent, then an `ef`-wide beam at the
    /// base layer.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        exclude: &HashSet<ArtworkId>,
    ) -> Vec<SearchHit> {
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => return Vec::new(), // empty index
        };

        let mut ep = vec![entry_point];
        for layer in (1..=self.max_layer).rev() {
            let candidates = self.search_layer(query, &ep, 1, layer, None);
            if let Some(best) = candidates.first() {
                ep = vec![best.node_id];
            }
        }

        let candidates = self.search_layer(query, &ep, ef, 0, Some(exclude));

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|c| {
                self.nodes
                    .get(c.node_id as usize)
                    .map(|node| SearchHit::new(node.artwork_id.clone(), c.distance))
            })
            .collect();
        // Re-sort on (distance, artwork id): the beam tie-breaks on arena
        // ids, result ranking tie-breaks on artwork ids.
        hits.sort();
        hits.truncate(k);
        hits
    }

    fn tombstone_count(&self) -> usize {
        self.nodes.len() - self.id_map.len()
    }
}

/// Statistics returned by [`HnswIndex::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Arena size before the rebuild (including tombstones).
    pub nodes_before: usize,
    /// Arena size after the rebuild.
    pub nodes_after: usize,
    /// Tombstones dropped.
    pub tombstones_removed: usize,
}

/// HNSW index over artwork embeddings.
///
/// Thread-safe: any number of concurrent searches run against shared read
/// guards; insert/remove/compact serialize on an internal write gate.
pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    core: RwLock<GraphCore>,
    write_gate: Mutex<()>,
}

impl HnswIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        let core = GraphCore::new(&config);
        Self {
            config,
            dimension,
            core: RwLock::new(core),
            write_gate: Mutex::new(()),
        }
    }

    pub(crate) fn from_core(dimension: usize, config: HnswConfig, core: GraphCore) -> Self {
        Self {
            config,
            dimension,
            core: RwLock::new(core),
            write_gate: Mutex::new(()),
        }
    }

    /// Tuning parameters.
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Fixed vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert a vector under the given id.
    ///
    /// Re-inserting an existing id is treated as an update: the old node is
    /// tombstoned and a fresh one inserted, so the id never appears twice
    /// in results.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when the vector has the wrong dimension.
    pub fn insert(&self, id: &ArtworkId, vector: &Embedding) -> Result<()> {
        vector.check_dim(self.dimension)?;

        let _gate = self.write_gate.lock();
        let mut core = self.core.write();
        if core.id_map.contains_key(id) {
            tracing::debug!(artwork = %id, "reinsert of existing id, tombstoning old node");
            core.tombstone(id);
        }
        core.insert(id.clone(), vector.clone(), &self.config);
        Ok(())
    }

    /// Tombstone an id. Returns `false` when the id is unknown.
    pub fn remove(&self, id: &ArtworkId) -> bool {
        let _gate = self.write_gate.lock();
        let mut core = self.core.write();
        core.tombstone(id)
    }

    /// Approximate top-k search, excluding the given ids from results.
    ///
    /// An empty index yields an empty result; a `k` larger than the active
    /// node count yields fewer than `k` hits. Neither is an error.
    pub fn search(
        &self,
        query: &Embedding,
        k: usize,
        exclude: &HashSet<ArtworkId>,
    ) -> Result<Vec<SearchHit>> {
        query.check_dim(self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let ef = self.config.ef_search.max(k);
        let core = self.core.read();
        Ok(core.search(query.as_slice(), k, ef, exclude))
    }

    /// Whether an id is present and not tombstoned.
    pub fn contains(&self, id: &ArtworkId) -> bool {
        self.core.read().id_map.contains_key(id)
    }

    /// Number of active (non-tombstoned) nodes.
    pub fn active_len(&self) -> usize {
        self.core.read().id_map.len()
    }

    /// Total arena size, tombstones included.
    pub fn len(&self) -> usize {
        self.core.read().nodes.len()
    }

    /// Whether the index has no active nodes.
    pub fn is_empty(&self) -> bool {
        self.active_len() == 0
    }

    /// Fraction of arena nodes that are tombstones.
    pub fn tombstone_ratio(&self) -> f32 {
        let core = self.core.read();
        if core.nodes.is_empty() {
            return 0.0;
        }
        core.tombstone_count() as f32 / core.nodes.len() as f32
    }

    /// Whether the tombstone ratio has crossed the configured threshold.
    pub fn needs_compaction(&self) -> bool {
        self.tombstone_ratio() > self.config.compaction_threshold
    }

    /// Rebuild the graph without tombstones.
    ///
    /// The replacement graph is built off to the side while searches keep
    /// running against the current one; the swap itself is a brief
    /// exclusive section.
    pub fn compact(&self) -> CompactionStats {
        let _gate = self.write_gate.lock();

        let pairs: Vec<(ArtworkId, Embedding)> = {
            let core = self.core.read();
            core.nodes
                .iter()
                .filter(|n| !n.deleted)
                .map(|n| (n.artwork_id.clone(), n.vector.clone()))
                .collect()
        };

        let mut fresh = GraphCore::new(&self.config);
        for (id, vector) in pairs {
            fresh.insert(id, vector, &self.config);
        }

        let mut core = self.core.write();
        let stats = CompactionStats {
            nodes_before: core.nodes.len(),
            nodes_after: fresh.nodes.len(),
            tombstones_removed: core.tombstone_count(),
        };
        *core = fresh;

        tracing::info!(
            nodes_before = stats.nodes_before,
            nodes_after = stats.nodes_after,
            "index compaction complete"
        );
        stats
    }

    pub(crate) fn read_core(&self) -> parking_lot::RwLockReadGuard<'_, GraphCore> {
        self.core.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(components: &[f32]) -> Embedding {
        Embedding::normalized(components.to_vec()).unwrap()
    }

    fn test_config() -> HnswConfig {
        HnswConfig {
            m: 8,
            m_max0: 16,
            ef_construction: 50,
            ef_search: 20,
            max_layers: 8,
            compaction_threshold: 0.2,
        }
    }

    fn no_exclude() -> HashSet<ArtworkId> {
        HashSet::new()
    }

    #[test]
    fn test_insert_and_self_search() {
        let index = HnswIndex::new(3, test_config());

        index.insert(&"met/1".into(), &unit(&[1.0, 0.0, 0.0])).unwrap();
        index.insert(&"met/2".into(), &unit(&[0.0, 1.0, 0.0])).unwrap();
        index.insert(&"met/3".into(), &unit(&[0.0, 0.0, 1.0])).unwrap();

        let hits = index.search(&unit(&[1.0, 0.0, 0.0]), 1, &no_exclude()).unwrap();
        assert_eq!(hits[0].id.as_str(), "met/1");
        assert!(hits[0].distance < 1e-5);
        assert!(hits[0].similarity() > 0.9999);
    }

    #[test]
    fn test_empty_index_returns_no_hits() {
        let index = HnswIndex::new(3, test_config());
        let hits = index.search(&unit(&[1.0, 0.0, 0.0]), 5, &no_exclude()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_k_exceeding_active_count() {
        let index = HnswIndex::new(2, test_config());
        index.insert(&"met/1".into(), &unit(&[1.0, 0.0])).unwrap();
        index.insert(&"met/2".into(), &unit(&[0.0, 1.0])).unwrap();

        let hits = index.search(&unit(&[1.0, 0.0]), 10, &no_exclude()).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = HnswIndex::new(3, test_config());
        let result = index.insert(&"met/1".into(), &unit(&[1.0, 0.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let index = HnswIndex::new(2, test_config());
        index.insert(&"met/1".into(), &unit(&[1.0, 0.0])).unwrap();
        index.insert(&"met/1".into(), &unit(&[1.0, 0.1])).unwrap();

        assert_eq!(index.active_len(), 1);

        let hits = index.search(&unit(&[1.0, 0.0]), 10, &no_exclude()).unwrap();
        let count = hits.iter().filter(|h| h.id.as_str() == "met/1").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_removed_id_is_excluded_from_results() {
        let index = HnswIndex::new(2, test_config());
        index.insert(&"met/1".into(), &unit(&[1.0, 0.0])).unwrap();
        index.insert(&"met/2".into(), &unit(&[0.9, 0.1])).unwrap();
        index.insert(&"met/3".into(), &unit(&[0.0, 1.0])).unwrap();

        assert!(index.remove(&"met/2".into()));
        assert!(!index.remove(&"met/2".into())); // already gone

        let hits = index.search(&unit(&[1.0, 0.0]), 10, &no_exclude()).unwrap();
        assert!(hits.iter().all(|h| h.id.as_str() != "met/2"));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_exclude_set_is_honored() {
        let index = HnswIndex::new(2, test_config());
        index.insert(&"met/1".into(), &unit(&[1.0, 0.0])).unwrap();
        index.insert(&"met/2".into(), &unit(&[0.9, 0.1])).unwrap();

        let exclude: HashSet<ArtworkId> = [ArtworkId::from("met/1")].into_iter().collect();
        let hits = index.search(&unit(&[1.0, 0.0]), 10, &exclude).unwrap();
        assert!(hits.iter().all(|h| h.id.as_str() != "met/1"));
    }

    #[test]
    fn test_results_ranked_by_similarity() {
        let index = HnswIndex::new(2, test_config());
        index.insert(&"met/far".into(), &unit(&[0.0, 1.0])).unwrap();
        index.insert(&"met/near".into(), &unit(&[0.95, 0.05])).unwrap();
        index.insert(&"met/mid".into(), &unit(&[0.5, 0.5])).unwrap();

        let hits = index.search(&unit(&[1.0, 0.0]), 3, &no_exclude()).unwrap();
        assert_eq!(hits[0].id.as_str(), "met/near");
        assert_eq!(hits[1].id.as_str(), "met/mid");
        assert_eq!(hits[2].id.as_str(), "met/far");

        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_smaller_k_is_prefix_of_larger_k() {
        let index = HnswIndex::new(4, test_config());
        for i in 0..30 {
            let v = unit(&[1.0, i as f32 * 0.05, (i % 3) as f32 * 0.1, 0.2]);
            index.insert(&format!("met/{i}").into(), &v).unwrap();
        }

        let query = unit(&[1.0, 0.3, 0.1, 0.2]);
        let small = index.search(&query, 3, &no_exclude()).unwrap();
        let large = index.search(&query, 8, &no_exclude()).unwrap();

        assert!(large.len() >= small.len());
        for (s, l) in small.iter().zip(large.iter()) {
            assert_eq!(s.id, l.id);
        }
    }

    #[test]
    fn test_tombstone_ratio_and_compaction() {
        let index = HnswIndex::new(2, test_config());
        for i in 0..10 {
            let angle = i as f32 * 0.15;
            index
                .insert(&format!("met/{i}").into(), &unit(&[angle.cos(), angle.sin()]))
                .unwrap();
        }

        for i in 0..3 {
            index.remove(&format!("met/{i}").into());
        }

        assert!((index.tombstone_ratio() - 0.3).abs() < 1e-6);
        assert!(index.needs_compaction());

        let before = index.search(&unit(&[1.0, 0.0]), 5, &no_exclude()).unwrap();
        let stats = index.compact();
        let after = index.search(&unit(&[1.0, 0.0]), 5, &no_exclude()).unwrap();

        assert_eq!(stats.tombstones_removed, 3);
        assert_eq!(stats.nodes_after, 7);
        assert_eq!(index.len(), 7);
        assert!(!index.needs_compaction());

        let before_ids: Vec<_> = before.iter().map(|h| h.id.clone()).collect();
        let after_ids: Vec<_> = after.iter().map(|h| h.id.clone()).collect();
        assert_eq!(before_ids, after_ids);
    }

    #[test]
    fn test_larger_dataset_recall() {
        let index = HnswIndex::new(8, HnswConfig::default());

        for i in 0..200usize {
            let raw: Vec<f32> = (0..8).map(|j| ((i * 8 + j) as f32 * 0.7).sin()).collect();
            index.insert(&format!("met/{i}").into(), &unit(&raw)).unwrap();
        }

        assert_eq!(index.active_len(), 200);

        // Query with an indexed vector: it must come back first.
        let raw: Vec<f32> = (0..8).map(|j| ((42 * 8 + j) as f32 * 0.7).sin()).collect();
        let hits = index.search(&unit(&raw), 10, &no_exclude()).unwrap();
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].id.as_str(), "met/42");
    }
}
