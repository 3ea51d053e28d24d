//! Index snapshots using bincode.
//!
//! A snapshot captures the graph topology: node ids with their layers and
//! tombstone flags, per-layer adjacency, and the entry point. Vectors are
//! not duplicated into the snapshot; they are re-joined from the canonical
//! vector store at load time through a lookup closure. Take snapshots after
//! compaction so every node's record still exists; a tombstoned node whose
//! record was purged fails the load.

use crate::graph::{Node, NodeId};
use crate::index::{GraphCore, HnswConfig, HnswIndex};
use crate::{HnswError, Result};
use muse_vector::{ArtworkId, Embedding};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One node's persisted identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: ArtworkId,
    pub max_layer: usize,
    pub deleted: bool,
}

/// Serializable graph topology.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswSnapshot {
    pub config: HnswConfig,
    pub dimension: usize,
    /// Nodes in arena order.
    pub nodes: Vec<NodeSnapshot>,
    /// Per-layer adjacency as (node, neighbor ids) pairs, sorted by node.
    pub layers: Vec<Vec<(NodeId, Vec<NodeId>)>>,
    pub entry_point: Option<NodeId>,
    pub max_layer: usize,
}

impl HnswSnapshot {
    /// Write the snapshot to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Read a snapshot back from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let snapshot = bincode::deserialize_from(reader)?;
        Ok(snapshot)
    }
}

impl HnswIndex {
    /// Export the current graph topology.
    pub fn snapshot(&self) -> HnswSnapshot {
        let core = self.read_core();

        let nodes = core
            .nodes
            .iter()
            .map(|n| NodeSnapshot {
                id: n.artwork_id.clone(),
                max_layer: n.max_layer,
                deleted: n.deleted,
            })
            .collect();

        let layers = core
            .layers
            .iter()
            .map(|layer| {
                let mut adjacency: Vec<(NodeId, Vec<NodeId>)> = layer
                    .iter()
                    .map(|(&node, neighbors)| (node, neighbors.as_slice().to_vec()))
                    .collect();
                adjacency.sort_by_key(|(node, _)| *node);
                adjacency
            })
            .collect();

        HnswSnapshot {
            config: self.config().clone(),
            dimension: self.dimension(),
            nodes,
            layers,
            entry_point: core.entry_point,
            max_layer: core.max_layer,
        }
    }

    /// Rebuild an index from a snapshot, resolving vectors via `lookup`.
    ///
    /// # Errors
    ///
    /// `GraphInvariant` when the snapshot is internally inconsistent
    /// (dangling node references, duplicate ids, layer count mismatch) or
    /// when `lookup` cannot resolve a node's embedding.
    pub fn from_snapshot<F>(snapshot: HnswSnapshot, mut lookup: F) -> Result<Self>
    where
        F: FnMut(&ArtworkId) -> Option<Embedding>,
    {
        if snapshot.layers.len() != snapshot.config.max_layers {
            return Err(HnswError::GraphInvariant(format!(
                "snapshot has {} layers, config expects {}",
                snapshot.layers.len(),
                snapshot.config.max_layers
            )));
        }

        let mut core = GraphCore::new(&snapshot.config);

        for (index, node) in snapshot.nodes.iter().enumerate() {
            let vector = lookup(&node.id).ok_or_else(|| {
                HnswError::GraphInvariant(format!("missing embedding for node {}", node.id))
            })?;
            vector.check_dim(snapshot.dimension)?;

            if !node.deleted && core.id_map.insert(node.id.clone(), index as NodeId).is_some() {
                return Err(HnswError::GraphInvariant(format!(
                    "duplicate active node id {}",
                    node.id
                )));
            }
            core.nodes.push(Node {
                artwork_id: node.id.clone(),
                vector,
                max_layer: node.max_layer,
                deleted: node.deleted,
            });
        }

        let node_count = core.nodes.len();
        for (layer_index, adjacency) in snapshot.layers.iter().enumerate() {
            let state = match core.layers.get_mut(layer_index) {
                Some(state) => state,
                None => break,
            };
            for (node, neighbor_ids) in adjacency {
                if *node as usize >= node_count
                    || neighbor_ids.iter().any(|n| *n as usize >= node_count)
                {
                    return Err(HnswError::GraphInvariant(format!(
                        "dangling node reference at layer {}",
                        layer_index
                    )));
                }
                state.set_neighbors(*node, neighbor_ids.iter().copied().collect());
            }
        }

        if let Some(ep) = snapshot.entry_point {
            if ep as usize >= node_count {
                return Err(HnswError::GraphInvariant(
                    "entry point references a missing node".to_string(),
                ));
            }
        }
        core.entry_point = snapshot.entry_point;
        core.max_layer = snapshot.max_layer;

        Ok(HnswIndex::from_core(snapshot.dimension, snapshot.config, core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    fn unit(components: &[f32]) -> Embedding {
        Embedding::normalized(components.to_vec()).unwrap()
    }

    fn build_index() -> (HnswIndex, HashMap<ArtworkId, Embedding>) {
        let config = HnswConfig {
            m: 8,
            m_max0: 16,
            ef_construction: 50,
            ef_search: 20,
            max_layers: 8,
            compaction_threshold: 0.2,
        };
        let index = HnswIndex::new(3, config);
        let mut vectors = HashMap::new();

        for i in 0..25usize {
            let id = ArtworkId::from(format!("met/{i}"));
            let raw: Vec<f32> = (0..3).map(|j| ((i * 3 + j) as f32 * 0.9).cos()).collect();
            let embedding = unit(&raw);
            index.insert(&id, &embedding).unwrap();
            vectors.insert(id, embedding);
        }

        (index, vectors)
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_search() {
        let (index, vectors) = build_index();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.snap");

        index.snapshot().save(&path).unwrap();
        let restored =
            HnswIndex::from_snapshot(HnswSnapshot::load(&path).unwrap(), |id| {
                vectors.get(id).cloned()
            })
            .unwrap();

        assert_eq!(restored.active_len(), index.active_len());

        let no_exclude = HashSet::new();
        for i in [0usize, 7, 19] {
            let raw: Vec<f32> = (0..3).map(|j| ((i * 3 + j) as f32 * 0.9).cos()).collect();
            let query = unit(&raw);

            let original = index.search(&query, 5, &no_exclude).unwrap();
            let reloaded = restored.search(&query, 5, &no_exclude).unwrap();

            let original_ids: Vec<_> = original.iter().map(|h| h.id.clone()).collect();
            let reloaded_ids: Vec<_> = reloaded.iter().map(|h| h.id.clone()).collect();
            assert_eq!(original_ids, reloaded_ids);

            for (a, b) in original.iter().zip(reloaded.iter()) {
                assert!((a.distance - b.distance).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_load_fails_on_missing_embedding() {
        let (index, _) = build_index();
        let snapshot = index.snapshot();

        let result = HnswIndex::from_snapshot(snapshot, |_| None);
        assert!(matches!(result, Err(HnswError::GraphInvariant(_))));
    }

    #[test]
    fn test_load_fails_on_dangling_reference() {
        let (index, vectors) = build_index();
        let mut snapshot = index.snapshot();

        // Corrupt one adjacency entry with an out-of-range node.
        snapshot.layers[0].push((9999, vec![0]));

        let result = HnswIndex::from_snapshot(snapshot, |id| vectors.get(id).cloned());
        assert!(matches!(result, Err(HnswError::GraphInvariant(_))));
    }
}
