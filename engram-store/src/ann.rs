//! In-memory HNSW index over episode embeddings
//!
//! The graph is rebuilt from the vector cache once enough inserts have
//! accumulated; vectors added since the last build are scored linearly so
//! they are never missed.

use dashmap::{DashMap, DashSet};
use instant_distance::{Builder, HnswMap, Point, Search};
use parking_lot::{Mutex, RwLock};

/// Pending inserts tolerated before the graph is rebuilt
const MIN_PENDING_BEFORE_REBUILD: usize = 64;

/// HNSW point wrapper for semantic search
#[derive(Clone)]
struct EmbeddingPoint(Vec<f32>);

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - similarity (HNSW finds minimum)
        1.0 - cosine_similarity(&self.0, &other.0)
    }
}

struct Graph {
    hnsw: HnswMap<EmbeddingPoint, String>,
    size: usize,
}

/// Approximate nearest-neighbor index keyed by episode id
pub struct VectorIndex {
    vectors: DashMap<String, Vec<f32>>,
    pending: DashSet<String>,
    graph: RwLock<Option<Graph>>,
    rebuild_lock: Mutex<()>,
    ef_construction: usize,
    ef_search: usize,
}

impl VectorIndex {
    pub fn new(ef_construction: usize, ef_search: usize) -> Self {
        Self {
            vectors: DashMap::new(),
            pending: DashSet::new(),
            graph: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            ef_construction,
            ef_search,
        }
    }

    pub fn insert(&self, id: &str, vector: Vec<f32>) {
        self.vectors.insert(id.to_string(), vector);
        self.pending.insert(id.to_string());
    }

    pub fn remove(&self, id: &str) {
        self.vectors.remove(id);
        self.pending.remove(id);
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Candidate ids with their exact cosine similarity, most similar first
    pub fn nearest(&self, query: &[f32]) -> Vec<(String, f32)> {
        self.maybe_rebuild();

        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();

        if let Some(graph) = self.graph.read().as_ref() {
            let query_point = EmbeddingPoint(query.to_vec());
            let mut search = Search::default();
            for candidate in graph.hnsw.search(&query_point, &mut search) {
                let id = candidate.value;
                // Deleted since the last build
                let Some(vector) = self.vectors.get(id) else {
                    continue;
                };
                if seen.insert(id.clone()) {
                    results.push((id.clone(), cosine_similarity(query, vector.value())));
                }
            }
        }

        for id in self.pending.iter() {
            if let Some(vector) = self.vectors.get(id.key()) {
                if seen.insert(id.key().clone()) {
                    results.push((id.key().clone(), cosine_similarity(query, vector.value())));
                }
            }
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    fn maybe_rebuild(&self) {
        let built = self.graph.read().as_ref().map(|g| g.size).unwrap_or(0);
        let threshold = MIN_PENDING_BEFORE_REBUILD.max(built / 10);
        if self.pending.len() <= threshold {
            return;
        }
        // Another caller is already rebuilding
        let Some(_guard) = self.rebuild_lock.try_lock() else {
            return;
        };
        self.rebuild();
    }

    /// Rebuild the graph from every cached vector
    pub fn rebuild(&self) {
        let (points, ids): (Vec<EmbeddingPoint>, Vec<String>) = self
            .vectors
            .iter()
            .map(|entry| (EmbeddingPoint(entry.value().clone()), entry.key().clone()))
            .unzip();

        if points.is_empty() {
            *self.graph.write() = None;
            return;
        }

        let size = points.len();
        let hnsw = Builder::default()
            .ef_construction(self.ef_construction)
            .ef_search(self.ef_search)
            .build(points, ids.clone());

        *self.graph.write() = Some(Graph { hnsw, size });
        for id in &ids {
            self.pending.remove(id);
        }
        log::debug!("Rebuilt HNSW index with {} vectors", size);
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_pending_vectors_are_searched() {
        let index = VectorIndex::new(100, 100);
        index.insert("a", unit(8, 0));
        index.insert("b", unit(8, 1));

        let results = index.nearest(&[0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_rebuilt_graph_and_removal() {
        let index = VectorIndex::new(100, 100);
        for i in 0..200 {
            let mut v = unit(16, i % 16);
            v[(i + 1) % 16] = (i as f32) / 200.0;
            index.insert(&format!("ep-{i}"), v);
        }
        index.rebuild();
        assert_eq!(index.len(), 200);

        index.remove("ep-0");
        let results = index.nearest(&unit(16, 0));
        assert!(!results.is_empty());
        assert!(results.iter().all(|(id, _)| id != "ep-0"));
        // Sorted by similarity
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
