use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use anyhow::{Result, bail};

/// Hard cap on sampled levels; with M=16 the probability of exceeding this
/// is negligible for any realistic corpus.
const MAX_LEVEL_CAP: usize = 16;

/// Tuning knobs for the small-world graph.
#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    /// M: maximum neighbours kept per node per layer.
    pub max_connections: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Default beam width while searching (raised to topK when smaller).
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        HnswConfig {
            max_connections: 16,
            ef_construction: 100,
            ef_search: 50,
        }
    }
}

/// Aggregate counters exposed for stats output.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HnswStats {
    pub count: usize,
    pub dimension: Option<usize>,
    pub max_level: usize,
}

struct HnswNode {
    vector: Vec<f32>,
    level: usize,
    /// Neighbour ids per layer, index 0 = base layer.
    neighbors: Vec<Vec<String>>,
}

/// A candidate ordered by similarity (ties broken by id so heap order is
/// deterministic).
#[derive(Debug, Clone, PartialEq)]
struct ScoredId {
    id: String,
    sim: f32,
}

impl Eq for ScoredId {}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sim
            .total_cmp(&other.sim)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Hierarchical navigable small-world index over L2-normalised vectors,
/// keyed by string node ids. Queries score by cosine similarity, which on
/// normalised vectors is a plain dot product.
///
/// The index is append-and-remove only; it never rebalances. Levels are
/// drawn deterministically from the id hash, so the same id set always
/// produces the same graph.
#[derive(Default)]
pub struct HnswIndex {
    config: HnswConfig,
    dimension: Option<usize>,
    nodes: HashMap<String, HnswNode>,
    entry_point: Option<String>,
    max_level: usize,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        HnswIndex {
            config,
            dimension: None,
            nodes: HashMap::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> HnswStats {
        HnswStats {
            count: self.nodes.len(),
            dimension: self.dimension,
            max_level: self.max_level,
        }
    }

    /// Drop every vector and forget the dimension; the next insert fixes it
    /// again.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.dimension = None;
    }

    /// Insert a vector under `id`, or replace the stored vector when the id
    /// is already present (a semantic update; links are kept).
    ///
    /// The first insert fixes the index dimension; later inserts of a
    /// different dimension fail, as do zero-length vectors.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            bail!("cannot index a zero-length vector for {id}");
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => {
                bail!(
                    "vector for {id} has dimension {} but the index holds {}",
                    vector.len(),
                    dim
                );
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }

        let vector = normalize(vector);

        if let Some(existing) = self.nodes.get_mut(id) {
            existing.vector = vector;
            return Ok(());
        }

        let level = sample_level(id, self.config.max_connections);
        let node = HnswNode {
            vector: vector.clone(),
            level,
            neighbors: vec![Vec::new(); level + 1],
        };

        let Some(entry) = self.entry_point.clone() else {
            self.nodes.insert(id.to_owned(), node);
            self.entry_point = Some(id.to_owned());
            self.max_level = level;
            return Ok(());
        };

        self.nodes.insert(id.to_owned(), node);

        // Greedy descent through the layers above the new node's level.
        let mut current = entry;
        let mut lvl = self.max_level;
        while lvl > level {
            current = self.greedy_step(&vector, current, lvl);
            lvl -= 1;
        }

        // Link into every layer the new node occupies.
        let m = self.config.max_connections;
        for lvl in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&vector, &current, self.config.ef_construction, lvl);
            let selected: Vec<String> = found
                .iter()
                .filter(|c| c.id != id)
                .take(m)
                .map(|c| c.id.clone())
                .collect();

            for neighbor_id in &selected {
                self.nodes
                    .get_mut(id)
                    .expect("new node present")
                    .neighbors[lvl]
                    .push(neighbor_id.clone());
                if let Some(neighbor) = self.nodes.get_mut(neighbor_id) {
                    if lvl < neighbor.neighbors.len() {
                        neighbor.neighbors[lvl].push(id.to_owned());
                    }
                }
                self.prune_neighbors(neighbor_id, lvl);
            }

            if let Some(best) = found.first() {
                current = best.id.clone();
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id.to_owned());
        }
        Ok(())
    }

    /// Detach `id` from every layer it occupies. Returns `false` when the id
    /// was never indexed. The entry point and max level are recomputed when
    /// the removed node held either.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(removed) = self.nodes.remove(id) else {
            return false;
        };

        for lvl in 0..=removed.level {
            for neighbor_id in &removed.neighbors[lvl] {
                if let Some(neighbor) = self.nodes.get_mut(neighbor_id) {
                    if lvl < neighbor.neighbors.len() {
                        neighbor.neighbors[lvl].retain(|n| n != id);
                    }
                }
            }
        }
        // Stale back-references can survive asymmetric pruning; sweep them.
        for node in self.nodes.values_mut() {
            for layer in &mut node.neighbors {
                layer.retain(|n| n != id);
            }
        }

        if self.entry_point.as_deref() == Some(id) {
            let new_entry = self
                .nodes
                .iter()
                .max_by(|(a_id, a), (b_id, b)| a.level.cmp(&b.level).then_with(|| b_id.cmp(a_id)))
                .map(|(id, node)| (id.clone(), node.level));
            match new_entry {
                Some((entry, level)) => {
                    self.entry_point = Some(entry);
                    self.max_level = level;
                }
                None => {
                    self.entry_point = None;
                    self.max_level = 0;
                }
            }
        }
        true
    }

    /// Approximate nearest neighbours of `query`, best first.
    ///
    /// An empty index or an empty query vector (embeddings disabled) yields
    /// an empty result so callers can fall back to lexical search; a
    /// non-empty query of the wrong dimension is an error.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        ef: Option<usize>,
    ) -> Result<Vec<(String, f32)>> {
        if self.nodes.is_empty() || query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dim) = self.dimension {
            if query.len() != dim {
                bail!(
                    "query has dimension {} but the index holds {}",
                    query.len(),
                    dim
                );
            }
        }

        let query = normalize(query);
        let entry = self.entry_point.clone().expect("non-empty index has entry");

        let mut current = entry;
        for lvl in (1..=self.max_level).rev() {
            current = self.greedy_step(&query, current, lvl);
        }

        let ef = ef.unwrap_or(self.config.ef_search).max(top_k);
        let mut results = self.search_layer(&query, &current, ef, 0);
        results.truncate(top_k);
        Ok(results.into_iter().map(|c| (c.id, c.sim)).collect())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Hill-climb at `level`: keep moving to the most similar neighbour until
    /// no neighbour improves on the current node.
    fn greedy_step(&self, query: &[f32], start: String, level: usize) -> String {
        let mut current = start;
        let mut current_sim = self
            .nodes
            .get(&current)
            .map(|n| dot(query, &n.vector))
            .unwrap_or(f32::MIN);

        loop {
            let mut improved = false;
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            if level >= node.neighbors.len() {
                break;
            }
            let mut best = current.clone();
            for neighbor_id in &node.neighbors[level] {
                let Some(neighbor) = self.nodes.get(neighbor_id) else {
                    continue;
                };
                let sim = dot(query, &neighbor.vector);
                if sim > current_sim {
                    best = neighbor_id.clone();
                    current_sim = sim;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
            current = best;
        }
        current
    }

    /// Beam search at `level` starting from `entry`, returning up to `ef`
    /// candidates sorted by similarity descending.
    fn search_layer(&self, query: &[f32], entry: &str, ef: usize, level: usize) -> Vec<ScoredId> {
        let Some(entry_node) = self.nodes.get(entry) else {
            return Vec::new();
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: BinaryHeap<ScoredId> = BinaryHeap::new();
        let mut results: Vec<ScoredId> = Vec::new();

        let entry_scored = ScoredId {
            id: entry.to_owned(),
            sim: dot(query, &entry_node.vector),
        };
        visited.insert(entry.to_owned());
        frontier.push(entry_scored);

        while let Some(candidate) = frontier.pop() {
            let worst = results.last().map(|c| c.sim).unwrap_or(f32::MIN);
            if results.len() >= ef && candidate.sim < worst {
                break;
            }

            if let Some(node) = self.nodes.get(&candidate.id) {
                if level < node.neighbors.len() {
                    for neighbor_id in &node.neighbors[level] {
                        if !visited.insert(neighbor_id.clone()) {
                            continue;
                        }
                        let Some(neighbor) = self.nodes.get(neighbor_id) else {
                            continue;
                        };
                        frontier.push(ScoredId {
                            id: neighbor_id.clone(),
                            sim: dot(query, &neighbor.vector),
                        });
                    }
                }
            }

            // `results` is kept sorted descending by similarity.
            let pos = results
                .binary_search_by(|probe| candidate.cmp(probe))
                .unwrap_or_else(|p| p);
            results.insert(pos, candidate);
            if results.len() > ef {
                results.pop();
            }
        }

        results
    }

    /// Trim a node's neighbour list at `level` back to M, keeping the
    /// closest by similarity to the node's own vector.
    fn prune_neighbors(&mut self, id: &str, level: usize) {
        let m = self.config.max_connections;
        let Some(node) = self.nodes.get(id) else { return };
        if level >= node.neighbors.len() || node.neighbors[level].len() <= m {
            return;
        }

        let own = node.vector.clone();
        let mut scored: Vec<ScoredId> = node.neighbors[level]
            .iter()
            .filter_map(|n| {
                self.nodes.get(n).map(|other| ScoredId {
                    id: n.clone(),
                    sim: dot(&own, &other.vector),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(m);

        if let Some(node) = self.nodes.get_mut(id) {
            node.neighbors[level] = scored.into_iter().map(|c| c.id).collect();
        }
    }
}

/// Deterministic level draw: map the id hash to a uniform in (0,1) and take
/// `⌊−ln(U) / ln(M)⌋`, capped.
fn sample_level(id: &str, max_connections: usize) -> usize {
    let hash = blake3::hash(id.as_bytes());
    let bytes: [u8; 8] = hash.as_bytes()[..8].try_into().expect("hash has 32 bytes");
    let raw = u64::from_le_bytes(bytes);
    let unit = (raw as f64 + 1.0) / (u64::MAX as f64 + 2.0);
    let m = (max_connections.max(2)) as f64;
    ((-unit.ln() / m.ln()).floor() as usize).min(MAX_LEVEL_CAP)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_nearest_vector_is_found_first() {
        let mut index = HnswIndex::new(HnswConfig::default());
        index.add("alpha", &basis(4, 0)).unwrap();
        index.add("beta", &basis(4, 1)).unwrap();
        index.add("gamma", &basis(4, 2)).unwrap();

        let results = index.search(&[0.9, 0.1, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].0, "alpha");
        assert!(results[0].1 > 0.9);
    }

    #[test]
    fn test_remove_surfaces_next_best() {
        let mut index = HnswIndex::new(HnswConfig::default());
        index.add("alpha", &basis(4, 0)).unwrap();
        index.add("beta", &basis(4, 1)).unwrap();
        index.add("gamma", &basis(4, 2)).unwrap();

        assert!(index.remove("alpha"));
        let results = index.search(&[0.9, 0.3, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(results[0].0, "beta", "beta is the closest survivor");
        assert!(results[0].1 > 0.0);
        assert!(results.iter().all(|(id, _)| id != "alpha"));
    }

    #[test]
    fn test_add_existing_id_replaces_vector() {
        let mut index = HnswIndex::new(HnswConfig::default());
        index.add("node", &basis(4, 0)).unwrap();
        index.add("other", &basis(4, 3)).unwrap();
        index.add("node", &basis(4, 1)).unwrap();

        let results = index.search(&basis(4, 1), 1, None).unwrap();
        assert_eq!(results[0].0, "node");
        assert_eq!(index.len(), 2, "replacement must not grow the index");
    }

    #[test]
    fn test_dimension_mismatch_fails_on_add_and_search() {
        let mut index = HnswIndex::new(HnswConfig::default());
        index.add("a", &basis(4, 0)).unwrap();
        assert!(index.add("b", &basis(3, 0)).is_err());
        assert!(index.search(&basis(3, 0), 1, None).is_err());
    }

    #[test]
    fn test_zero_length_vector_fails_on_add() {
        let mut index = HnswIndex::new(HnswConfig::default());
        assert!(index.add("a", &[]).is_err());
    }

    #[test]
    fn test_empty_query_and_empty_index_return_empty() {
        let mut index = HnswIndex::new(HnswConfig::default());
        assert!(index.search(&basis(4, 0), 3, None).unwrap().is_empty());

        index.add("a", &basis(4, 0)).unwrap();
        // No-op embedder hands out empty vectors: fall back, don't raise.
        assert!(index.search(&[], 3, None).unwrap().is_empty());
    }

    #[test]
    fn test_results_sorted_by_similarity() {
        let mut index = HnswIndex::new(HnswConfig::default());
        for i in 0..8 {
            index.add(&format!("n{i}"), &basis(8, i)).unwrap();
        }
        let results = index.search(&[0.8, 0.5, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0], 4, None).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1, "results must be sorted descending");
        }
        assert_eq!(results[0].0, "n0");
    }

    #[test]
    fn test_reset_clears_dimension() {
        let mut index = HnswIndex::new(HnswConfig::default());
        index.add("a", &basis(4, 0)).unwrap();
        index.reset();
        assert_eq!(index.stats().count, 0);
        // A different dimension is accepted after reset.
        index.add("b", &basis(7, 0)).unwrap();
        assert_eq!(index.stats().dimension, Some(7));
    }

    #[test]
    fn test_larger_corpus_recall() {
        let mut index = HnswIndex::new(HnswConfig::default());
        let dim = 16;
        for i in 0..100 {
            let mut v = vec![0.0f32; dim];
            v[i % dim] = 1.0;
            v[(i / dim) % dim] += 0.5;
            index.add(&format!("v{i}"), &v).unwrap();
        }
        // v0 has signature [1.5, 0, ...] after normalisation of [1+0.5, ...].
        let results = index.search(&basis(dim, 0), 5, Some(64)).unwrap();
        assert!(
            results.iter().any(|(id, _)| id == "v0"),
            "exact-axis vector should be within the top results"
        );
    }
}
