//! HNSW (Hierarchical Navigable Small World) proximity graph.
//!
//! Approximate nearest-neighbor search with incremental inserts and
//! tombstone deletes, expected O(log n) query depth.
//!
//! ## Algorithm
//!
//! A multi-layer graph: layer 0 contains every node with up to 2*M
//! connections, higher layers contain an exponentially thinning subset
//! with up to M connections. Search descends greedily from the top layer
//! and runs a two-heap beam search at layer 0.
//!
//! ## Representation
//!
//! Nodes live in an arena (`Vec<HnswNode>`) addressed by `NodeId`; a
//! `BTreeMap<String, NodeId>` maps keys to slots and a `BTreeSet<NodeId>`
//! holds tombstones. Deleted nodes keep their edges and relay traversal;
//! they are excluded from results and from neighbor selection.
//!
//! ## Determinism
//!
//! Level assignment uses a fixed-seed splitmix64 counter, neighbor sets
//! are `BTreeSet` (sorted iteration), and all orderings tie-break on
//! `NodeId` ascending — identical insert sequences build identical graphs.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::vector::distance::distance;
use ember_core::{DistanceMetric, EmberError, Result};
use parking_lot::Mutex;

/// HNSW tuning parameters.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Target connections per node above layer 0 (default: 16).
    pub m: usize,
    /// Build-time beam width (default: 200).
    pub ef_construction: usize,
    /// Search-time beam width (default: 50).
    pub ef_search: usize,
    /// Level-sampling normaliser (default: 1/ln 2, halving expected layer
    /// population per level).
    pub ml: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / std::f64::consts::LN_2,
        }
    }
}

impl HnswConfig {
    /// Degree cap at the given layer: 2*M at layer 0, M above.
    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

/// Arena slot index.
type NodeId = usize;

/// A node in the graph. The arena owns the vector; everything else refers
/// to nodes by id.
#[derive(Debug, Clone)]
struct HnswNode {
    key: String,
    vector: Vec<f32>,
    /// Offset of the INSERT record that produced this node.
    log_offset: u64,
    max_level: usize,
    /// neighbors[layer] = ids adjacent at that layer; len = max_level + 1.
    neighbors: Vec<BTreeSet<NodeId>>,
}

/// A search result: key plus its distance to the query, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Key of the matched vector.
    pub key: String,
    /// Distance to the query under the index metric.
    pub distance: f32,
}

/// Scored candidate. `BinaryHeap<Scored>` is a max-heap on distance (worst
/// on top, for result eviction); `BinaryHeap<Reverse<Scored>>` is a
/// min-heap (nearest on top, for expansion). Ties break on NodeId so
/// traversal order is deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    dist: f32,
    id: NodeId,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug)]
struct HnswInner {
    config: HnswConfig,
    dim: usize,
    metric: DistanceMetric,
    /// Arena; slots are reused on key update, never freed.
    nodes: Vec<HnswNode>,
    /// Key -> arena slot. BTreeMap for deterministic iteration.
    ids: BTreeMap<String, NodeId>,
    /// Logically deleted slots.
    tombstones: BTreeSet<NodeId>,
    entry_point: Option<NodeId>,
    rng_seed: u64,
    rng_counter: u64,
}

/// The HNSW index. One mutex guards the whole graph: inserts and removes
/// are exclusive, searches see a consistent snapshot under the same lock.
#[derive(Debug)]
pub struct HnswIndex {
    inner: Mutex<HnswInner>,
}

impl HnswIndex {
    /// Create an empty index for `dim`-dimensional vectors.
    pub fn new(dim: usize, metric: DistanceMetric, config: HnswConfig) -> Self {
        HnswIndex {
            inner: Mutex::new(HnswInner {
                config,
                dim,
                metric,
                nodes: Vec::new(),
                ids: BTreeMap::new(),
                tombstones: BTreeSet::new(),
                entry_point: None,
                rng_seed: 42,
                rng_counter: 0,
            }),
        }
    }

    /// Insert a vector under `key`, recording the log offset of its INSERT
    /// record. Re-inserting an existing key is an update: the old edges are
    /// detached and the node re-linked with the new vector, reviving a
    /// tombstoned key.
    pub fn insert(&self, key: &str, vector: Vec<f32>, log_offset: u64) -> Result<()> {
        let mut g = self.inner.lock();
        if vector.len() != g.dim {
            return Err(EmberError::DimensionMismatch {
                expected: g.dim,
                actual: vector.len(),
            });
        }

        if let Some(&id) = g.ids.get(key) {
            g.detach(id);
            g.tombstones.remove(&id);
            g.nodes[id].vector = vector;
            g.nodes[id].log_offset = log_offset;
            g.link(id);
        } else {
            let id = g.nodes.len();
            g.nodes.push(HnswNode {
                key: key.to_string(),
                vector,
                log_offset,
                max_level: 0,
                neighbors: Vec::new(),
            });
            g.ids.insert(key.to_string(), id);
            g.link(id);
        }
        Ok(())
    }

    /// k-nearest-neighbor search. Read-only; returns up to `k` live keys
    /// sorted by distance ascending. An empty index, `k == 0`, or a
    /// mismatched query dimension all return no results.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let g = self.inner.lock();
        if k == 0 || query.len() != g.dim {
            return Vec::new();
        }
        let Some(ep) = g.entry_point else {
            return Vec::new();
        };

        let ep_level = g.nodes[ep].max_level;
        let mut current = ep;
        if ep_level > 0 {
            current = g.greedy_to_layer(query, ep, ep_level, 1);
        }

        let ef = g.config.ef_search.max(k);
        let candidates = g.search_layer(query, current, ef, 0);

        candidates
            .into_iter()
            .take(k)
            .map(|s| SearchHit {
                key: g.nodes[s.id].key.clone(),
                distance: s.dist,
            })
            .collect()
    }

    /// Exact lookup: the stored vector and log offset, iff the key is
    /// present and not tombstoned.
    pub fn get(&self, key: &str) -> Option<(Vec<f32>, u64)> {
        let g = self.inner.lock();
        let &id = g.ids.get(key)?;
        if g.tombstones.contains(&id) {
            return None;
        }
        Some((g.nodes[id].vector.clone(), g.nodes[id].log_offset))
    }

    /// Tombstone a key. Returns true iff the key was live. The node and
    /// its edges are retained as traversal relays.
    pub fn remove(&self, key: &str) -> bool {
        let mut g = self.inner.lock();
        let Some(&id) = g.ids.get(key) else {
            return false;
        };
        if g.tombstones.contains(&id) {
            return false;
        }
        g.tombstones.insert(id);
        if g.entry_point == Some(id) {
            g.reelect_entry(None);
        }
        true
    }

    /// Number of live (non-tombstoned) keys.
    pub fn len(&self) -> usize {
        let g = self.inner.lock();
        g.ids.len() - g.tombstones.len()
    }

    /// Whether no live keys exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.inner.lock().dim
    }
}

impl HnswInner {
    /// Sample a level from the exponential distribution
    /// `floor(-ln(U) * ml)` using a deterministic counter-mode PRNG, so
    /// identical insert sequences assign identical levels.
    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(self.rng_seed.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.config.ml) as usize
    }

    fn is_tombstoned(&self, id: NodeId) -> bool {
        self.tombstones.contains(&id)
    }

    fn dist_to(&self, query: &[f32], id: NodeId) -> f32 {
        distance(query, &self.nodes[id].vector, self.metric)
    }

    /// Wire a node (with its vector and offset already in place) into the
    /// graph: assign a level, descend, select neighbors per layer, add
    /// bidirectional edges, re-prune overfull neighbors, and promote the
    /// entry point when the new node tops the hierarchy.
    fn link(&mut self, id: NodeId) {
        let level = self.assign_level();
        self.nodes[id].max_level = level;
        self.nodes[id].neighbors = (0..=level).map(|_| BTreeSet::new()).collect();

        let Some(ep) = self.entry_point else {
            self.entry_point = Some(id);
            return;
        };

        let query = self.nodes[id].vector.clone();
        let ep_level = self.nodes[ep].max_level;

        let mut current = ep;
        if ep_level > level {
            current = self.greedy_to_layer(&query, ep, ep_level, level + 1);
        }

        for layer in (0..=level.min(ep_level)).rev() {
            let candidates = self.search_layer(&query, current, self.config.ef_construction, layer);
            let cap = self.config.max_connections(layer);

            // Nearest-first selection; search_layer already excludes
            // tombstoned nodes. A re-linked node must not pick itself.
            let selected: Vec<NodeId> = candidates
                .iter()
                .map(|s| s.id)
                .filter(|&n| n != id)
                .take(cap)
                .collect();

            for &nb in &selected {
                self.nodes[id].neighbors[layer].insert(nb);
                if layer < self.nodes[nb].neighbors.len() {
                    self.nodes[nb].neighbors[layer].insert(id);
                    if self.nodes[nb].neighbors[layer].len() > cap {
                        self.prune_neighbors(nb, layer, cap);
                    }
                }
            }

            if let Some(first) = candidates.first() {
                current = first.id;
            }
        }

        if level > ep_level {
            self.entry_point = Some(id);
        }
    }

    /// Remove a node's edges in both directions (for updates). The arena
    /// slot and key mapping stay; the caller re-links afterwards.
    fn detach(&mut self, id: NodeId) {
        let layers = std::mem::take(&mut self.nodes[id].neighbors);
        for (layer, neighbors) in layers.iter().enumerate() {
            for &nb in neighbors {
                if layer < self.nodes[nb].neighbors.len() {
                    self.nodes[nb].neighbors[layer].remove(&id);
                }
            }
        }
        if self.entry_point == Some(id) {
            self.reelect_entry(Some(id));
        }
    }

    /// Pick a new entry point: a live node (excluding `exclude`) with the
    /// maximum level, ties to the lowest id; None when no live node
    /// remains.
    fn reelect_entry(&mut self, exclude: Option<NodeId>) {
        self.entry_point = self
            .ids
            .values()
            .copied()
            .filter(|&i| Some(i) != exclude && !self.tombstones.contains(&i))
            .max_by_key(|&i| (self.nodes[i].max_level, Reverse(i)));
    }

    /// Beam search at a single layer.
    ///
    /// Returns up to `ef` live nodes sorted by distance ascending (ties on
    /// id). Tombstoned nodes are expanded as waypoints but never enter the
    /// result heap.
    fn search_layer(&self, query: &[f32], entry: NodeId, ef: usize, layer: usize) -> Vec<Scored> {
        let entry_dist = self.dist_to(query, entry);

        let mut visited = BTreeSet::new();
        visited.insert(entry);

        // Unexplored candidates, nearest on top.
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        candidates.push(Reverse(Scored {
            dist: entry_dist,
            id: entry,
        }));

        // Current best results, worst on top for O(1) eviction.
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();
        if !self.is_tombstoned(entry) {
            results.push(Scored {
                dist: entry_dist,
                id: entry,
            });
        }

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
            if nearest.dist > worst && results.len() >= ef {
                break;
            }

            let node = &self.nodes[nearest.id];
            if layer >= node.neighbors.len() {
                continue;
            }
            for &nb in &node.neighbors[layer] {
                if !visited.insert(nb) {
                    continue;
                }

                let d = self.dist_to(query, nb);
                let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < worst {
                    candidates.push(Reverse(Scored { dist: d, id: nb }));
                    if !self.is_tombstoned(nb) {
                        results.push(Scored { dist: d, id: nb });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_vec();
        out.sort();
        out
    }

    /// Greedy 1-NN descent from `from_layer` down to `to_layer`
    /// (equivalent to search_layer with ef = 1). At each layer, hill-climbs
    /// to the globally best neighbor until no improvement.
    fn greedy_to_layer(
        &self,
        query: &[f32],
        entry: NodeId,
        from_layer: usize,
        to_layer: usize,
    ) -> NodeId {
        let mut current = entry;

        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut best_dist = self.dist_to(query, current);
                let mut best = current;

                let node = &self.nodes[current];
                if layer < node.neighbors.len() {
                    for &nb in &node.neighbors[layer] {
                        let d = self.dist_to(query, nb);
                        if d < best_dist || (d == best_dist && nb < best) {
                            best_dist = d;
                            best = nb;
                        }
                    }
                }

                if best == current {
                    break;
                }
                current = best;
            }
        }

        current
    }

    /// Re-prune an overfull node's edge set at one layer to the `cap`
    /// nearest live neighbors, measured from the node's own vector.
    /// One-sided: the dropped neighbors keep their back-edge until their
    /// own next prune, so level symmetry is re-established lazily.
    fn prune_neighbors(&mut self, id: NodeId, layer: usize, cap: usize) {
        let own = self.nodes[id].vector.clone();

        let mut scored: Vec<Scored> = self.nodes[id].neighbors[layer]
            .iter()
            .copied()
            .filter(|&nb| !self.is_tombstoned(nb))
            .map(|nb| Scored {
                dist: distance(&own, &self.nodes[nb].vector, self.metric),
                id: nb,
            })
            .collect();
        scored.sort();

        self.nodes[id].neighbors[layer] = scored.into_iter().take(cap).map(|s| s.id).collect();
    }
}

/// SplitMix64 mixer used for deterministic level sampling.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index(dim: usize) -> HnswIndex {
        HnswIndex::new(dim, DistanceMetric::Euclidean, HnswConfig::default())
    }

    /// Exact top-k by linear scan, for recall comparison.
    fn brute_force_top_k(
        data: &[(String, Vec<f32>)],
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
    ) -> Vec<String> {
        let mut scored: Vec<(f32, &String)> = data
            .iter()
            .map(|(key, v)| (distance(query, v, metric), key))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        scored.into_iter().take(k).map(|(_, k)| k.clone()).collect()
    }

    #[test]
    fn test_insert_and_search_basic() {
        let index = make_index(3);
        index.insert("a", vec![1.0, 0.0, 0.0], 0).unwrap();
        index.insert("b", vec![0.0, 1.0, 0.0], 100).unwrap();
        index.insert("c", vec![0.9, 0.1, 0.0], 200).unwrap();

        assert_eq!(index.len(), 3);

        let hits = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "a");
        assert_eq!(hits[1].key, "c");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_basis_vector_baseline() {
        // Four canonical basis vectors plus [0.7, 0.7, 0, 0]; the query
        // [1.0, 0.1, 0, 0] must rank vec1 first at distance 0.1, then the
        // diagonal vector at sqrt(0.45).
        let index = make_index(4);
        index.insert("vec1", vec![1.0, 0.0, 0.0, 0.0], 0).unwrap();
        index.insert("vec2", vec![0.0, 1.0, 0.0, 0.0], 1).unwrap();
        index.insert("vec3", vec![0.0, 0.0, 1.0, 0.0], 2).unwrap();
        index.insert("vec4", vec![0.0, 0.0, 0.0, 1.0], 3).unwrap();
        index.insert("vec5", vec![0.7, 0.7, 0.0, 0.0], 4).unwrap();

        let hits = index.search(&[1.0, 0.1, 0.0, 0.0], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].key, "vec1");
        assert!((hits[0].distance - 0.1).abs() < 1e-4);
        assert_eq!(hits[1].key, "vec5");
        assert!((hits[1].distance - 0.6708).abs() < 1e-3);
    }

    #[test]
    fn test_get_returns_vector_and_offset() {
        let index = make_index(2);
        index.insert("k", vec![0.5, 0.5], 1234).unwrap();

        let (v, off) = index.get("k").unwrap();
        assert_eq!(v, vec![0.5, 0.5]);
        assert_eq!(off, 1234);

        assert!(index.get("missing").is_none());
    }

    #[test]
    fn test_remove_tombstones() {
        let index = make_index(2);
        index.insert("a", vec![1.0, 0.0], 0).unwrap();
        index.insert("b", vec![0.0, 1.0], 1).unwrap();

        assert!(index.remove("a"));
        assert!(!index.remove("a"), "double remove reports not-live");
        assert!(!index.remove("missing"));

        assert_eq!(index.len(), 1);
        assert!(index.get("a").is_none());

        let hits = index.search(&[1.0, 0.0], 10);
        assert!(hits.iter().all(|h| h.key != "a"));
    }

    #[test]
    fn test_tombstones_relay_traversal() {
        // Delete half of a cluster; the survivors must stay reachable
        // through the tombstoned relays.
        let index = make_index(2);
        for i in 0..50 {
            let angle = i as f32 * 0.1;
            index
                .insert(&format!("k{i}"), vec![angle.cos(), angle.sin()], i)
                .unwrap();
        }
        for i in (0..50).step_by(2) {
            assert!(index.remove(&format!("k{i}")));
        }

        let hits = index.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 10);
        for hit in &hits {
            let n: usize = hit.key[1..].parse().unwrap();
            assert_eq!(n % 2, 1, "tombstoned key {} surfaced", hit.key);
        }
    }

    #[test]
    fn test_update_moves_node() {
        let index = make_index(3);
        index.insert("a", vec![1.0, 0.0, 0.0], 0).unwrap();
        index.insert("b", vec![0.0, 1.0, 0.0], 1).unwrap();

        // Move "a" to a new direction; the old position must not win.
        index.insert("a", vec![0.0, 0.0, 1.0], 2).unwrap();
        assert_eq!(index.len(), 2);

        let hits = index.search(&[0.0, 0.0, 1.0], 1);
        assert_eq!(hits[0].key, "a");
        assert_eq!(index.get("a").unwrap().1, 2);
    }

    #[test]
    fn test_update_revives_tombstoned_key() {
        let index = make_index(2);
        index.insert("a", vec![1.0, 0.0], 0).unwrap();
        index.remove("a");
        assert_eq!(index.len(), 0);

        index.insert("a", vec![0.0, 1.0], 5).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().0, vec![0.0, 1.0]);
    }

    #[test]
    fn test_entry_point_reelection_on_remove() {
        let index = make_index(2);
        for i in 0..20 {
            index
                .insert(&format!("k{i}"), vec![i as f32, 0.0], i)
                .unwrap();
        }
        // Remove every key one by one; search must keep working until the
        // index drains empty.
        for i in 0..20 {
            assert!(index.remove(&format!("k{i}")));
            let hits = index.search(&[0.0, 0.0], 3);
            assert_eq!(hits.len(), 3.min(19 - i));
        }
        assert!(index.is_empty());
        assert!(index.search(&[0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_empty_and_k_zero() {
        let index = make_index(2);
        assert!(index.search(&[1.0, 0.0], 5).is_empty());

        index.insert("a", vec![1.0, 0.0], 0).unwrap();
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = make_index(3);
        let err = index.insert("a", vec![1.0, 0.0], 0).unwrap_err();
        assert!(matches!(
            err,
            EmberError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        index.insert("b", vec![1.0, 0.0, 0.0], 0).unwrap();
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_determinism_across_instances() {
        let build = || {
            let index = make_index(4);
            for i in 0..100 {
                let v: Vec<f32> = (0..4).map(|j| ((i * 4 + j) as f32 / 50.0).sin()).collect();
                index.insert(&format!("k{i}"), v, i as u64).unwrap();
            }
            index.search(&[0.3, -0.2, 0.9, 0.1], 10)
        };

        let first = build();
        for _ in 0..3 {
            assert_eq!(build(), first);
        }
    }

    #[test]
    fn test_recall_against_brute_force() {
        let dim = 16;
        let n = 300;
        let k = 10;

        let index = HnswIndex::new(dim, DistanceMetric::Euclidean, HnswConfig::default());
        let mut data = Vec::new();
        for i in 0..n {
            let v: Vec<f32> = (0..dim)
                .map(|j| ((i * dim + j) as f32 / 700.0).sin())
                .collect();
            let key = format!("k{i}");
            index.insert(&key, v.clone(), i as u64).unwrap();
            data.push((key, v));
        }

        let query: Vec<f32> = (0..dim).map(|j| (j as f32 / 9.0).cos()).collect();
        let expected = brute_force_top_k(&data, &query, k, DistanceMetric::Euclidean);
        let hits = index.search(&query, k);

        let found = hits
            .iter()
            .filter(|h| expected.contains(&h.key))
            .count();
        let recall = found as f64 / k as f64;
        assert!(
            recall >= 0.9,
            "recall {recall:.2} below 0.90 ({found}/{k} of true top-k)"
        );
    }

    #[test]
    fn test_cosine_metric() {
        let index = HnswIndex::new(2, DistanceMetric::Cosine, HnswConfig::default());
        index.insert("east", vec![5.0, 0.0], 0).unwrap();
        index.insert("north", vec![0.0, 3.0], 1).unwrap();

        // Cosine ignores magnitude: a short east-pointing query still
        // prefers "east".
        let hits = index.search(&[0.1, 0.0], 2);
        assert_eq!(hits[0].key, "east");
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[1].distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_results_sorted_ascending() {
        let index = make_index(2);
        for i in 0..30 {
            index
                .insert(&format!("k{i}"), vec![i as f32, 1.0], i)
                .unwrap();
        }
        let hits = index.search(&[7.3, 1.0], 10);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }
}
