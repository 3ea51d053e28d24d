//! Graph storage for the HNSW index.
//!
//! Nodes live in a flat arena and refer to each other by dense integer
//! index, so the cyclic neighbor structure needs no shared ownership.

use muse_vector::{ArtworkId, Embedding};

/// Internal node id (dense, for arena indexing).
pub type NodeId = u32;

/// A vertex in the HNSW graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// The artwork this vertex represents.
    pub artwork_id: ArtworkId,
    /// Copy of the unit-normalized embedding, kept hot for distance math.
    pub vector: Embedding,
    /// Highest layer this node participates in.
    pub max_layer: usize,
    /// Tombstone flag: excluded from results, retained for routing.
    pub deleted: bool,
}

/// Neighbor list for a node at one layer.
#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    ids: Vec<NodeId>,
}

impl Neighbors {
    /// Create empty neighbors.
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Add a neighbor if not already present. Returns true if added.
    pub fn add(&mut self, id: NodeId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Number of neighbors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate over neighbor ids.
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }

    /// The neighbor ids as a slice.
    pub fn as_slice(&self) -> &[NodeId] {
        &self.ids
    }
}

impl FromIterator<NodeId> for Neighbors {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Adjacency for a single layer.
#[derive(Debug, Default)]
pub struct LayerState {
    adjacency: std::collections::HashMap<NodeId, Neighbors>,
    max_degree: usize,
}

impl LayerState {
    /// Create an empty layer with the given degree bound.
    pub fn new(max_degree: usize) -> Self {
        Self {
            adjacency: std::collections::HashMap::new(),
            max_degree,
        }
    }

    /// Neighbors of a node, if it participates in this layer.
    pub fn neighbors(&self, node_id: NodeId) -> Option<&Neighbors> {
        self.adjacency.get(&node_id)
    }

    /// Replace a node's neighbor list.
    pub fn set_neighbors(&mut self, node_id: NodeId, neighbors: Neighbors) {
        self.adjacency.insert(node_id, neighbors);
    }

    /// Add a bidirectional edge.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.adjacency.entry(from).or_default().add(to);
        self.adjacency.entry(to).or_default().add(from);
    }

    /// Whether a node participates in this layer.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.adjacency.contains_key(&node_id)
    }

    /// Number of nodes in this layer.
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Whether the layer is empty.
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Degree bound for this layer.
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Iterate over (node, neighbors) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Neighbors)> {
        self.adjacency.iter()
    }
}

/// Draw the top layer for a new node.
///
/// Uses `floor(-ln(u) * m_l)` with `m_l = 1/ln(M)`, giving a geometric
/// distribution where roughly a `1/M` fraction of nodes reaches each next
/// layer.
pub fn random_layer(m: usize, max_layers: usize) -> usize {
    use rand::Rng;

    let m_l = 1.0 / (m.max(2) as f64).ln();

    let mut rng = rand::thread_rng();
    let uniform: f64 = rng.gen_range(0.0001..1.0); // avoid ln(0)

    let layer = (-uniform.ln() * m_l).floor() as usize;
    layer.min(max_layers.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbors_dedup() {
        let mut neighbors = Neighbors::new();
        assert!(neighbors.is_empty());

        assert!(neighbors.add(1));
        assert!(neighbors.add(2));
        assert!(!neighbors.add(1)); // duplicate

        assert_eq!(neighbors.len(), 2);
    }

    #[test]
    fn test_layer_edges_are_bidirectional() {
        let mut layer = LayerState::new(16);

        assert!(layer.is_empty());
        layer.add_edge(0, 1);
        layer.add_edge(0, 2);

        assert!(layer.neighbors(0).unwrap().as_slice().contains(&1));
        assert!(layer.neighbors(0).unwrap().as_slice().contains(&2));
        assert!(layer.neighbors(1).unwrap().as_slice().contains(&0));
        assert!(layer.contains(2));
        assert_eq!(layer.len(), 3);
    }

    #[test]
    fn test_random_layer_distribution() {
        let mut counts = vec![0usize; 16];
        for _ in 0..10_000 {
            let layer = random_layer(16, 16);
            assert!(layer < 16);
            counts[layer] += 1;
        }

        // The bottom layer must dominate.
        assert!(counts[0] > counts[1]);
        assert!(counts[0] > 8_000);
    }
}
