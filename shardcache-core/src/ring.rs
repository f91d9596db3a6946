//! Weighted consistent-hash ring (ketama).
//!
//! Nodes are placed on a 32-bit ring using the same point-generation scheme
//! as libketama: for each node a number of groups proportional to its weight
//! is derived, and each group contributes four 32-bit points taken from
//! successive little-endian windows of an MD5 digest of `"<node>-<i>-salt"`.
//! Key lookup hashes the key with MD5, takes the first four bytes as a
//! little-endian `u32`, and finds the first ring point greater than or equal
//! to it (wrapping back to the first point past the end).

use md5::{Digest, Md5};
use smol_str::SmolStr;
use std::collections::HashMap;

/// How many (point, weight) groups libketama allocates per node, scaled by
/// relative weight.
const POINTS_PER_SERVER: u64 = 40;

/// A weighted consistent-hash ring over a fixed set of named nodes.
///
/// Construction is pure over `(nodes, weights)`: the same inputs always
/// produce the same point table, so two rings built from equal inputs agree
/// on every lookup.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// Sorted by point; a lookup binary-searches this.
    points: Vec<(u32, SmolStr)>,
    nodes: Vec<SmolStr>,
    weights: HashMap<SmolStr, u32>,
}

impl HashRing {
    /// Builds a ring over `nodes`, using `weights` to scale each node's share
    /// of the ring (nodes absent from `weights` default to weight `1`).
    pub fn new<I, N>(nodes: I, weights: HashMap<SmolStr, u32>) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<SmolStr>,
    {
        let mut nodes: Vec<SmolStr> = nodes.into_iter().map(Into::into).collect();
        nodes.sort();
        nodes.dedup();
        let mut ring = HashRing {
            points: Vec::new(),
            nodes,
            weights,
        };
        ring.rebuild();
        ring
    }

    /// Builds a ring over `nodes`, all weighted equally.
    pub fn with_equal_weights<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<SmolStr>,
    {
        Self::new(nodes, HashMap::new())
    }

    fn rebuild(&mut self) {
        self.points.clear();
        if self.nodes.is_empty() {
            return;
        }
        let total_weight: u64 = self
            .nodes
            .iter()
            .map(|n| u64::from(self.weights.get(n).copied().unwrap_or(1)))
            .sum();
        if total_weight == 0 {
            return;
        }
        for node in &self.nodes {
            let weight = u64::from(self.weights.get(node).copied().unwrap_or(1));
            let groups = (POINTS_PER_SERVER * self.nodes.len() as u64 * weight) / total_weight;
            for i in 0..groups {
                let digest = Md5::digest(format!("{node}-{i}-salt").as_bytes());
                for l in 0..4 {
                    let base = l * 4;
                    let point = u32::from(digest[base])
                        | (u32::from(digest[base + 1]) << 8)
                        | (u32::from(digest[base + 2]) << 16)
                        | (u32::from(digest[base + 3]) << 24);
                    self.points.push((point, node.clone()));
                }
            }
        }
        self.points.sort_by_key(|(point, _)| *point);
    }

    /// Returns `true` if the ring carries no nodes.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points on the ring (≈ `40 * nodes` for equal weights).
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns the node owning `key`, or `None` if the ring is empty.
    pub fn get_node(&self, key: &[u8]) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let digest = Md5::digest(key);
        let point = u32::from(digest[0])
            | (u32::from(digest[1]) << 8)
            | (u32::from(digest[2]) << 16)
            | (u32::from(digest[3]) << 24);
        // First point strictly greater than `point` (ketama's bisect-right
        // lookup), wrapping past the end back to the ring's start.
        let idx = self.points.partition_point(|(p, _)| *p <= point);
        let idx = if idx == self.points.len() { 0 } else { idx };
        Some(&self.points[idx].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_has_no_node() {
        let ring = HashRing::with_equal_weights(Vec::<SmolStr>::new());
        assert!(ring.is_empty());
        assert_eq!(ring.get_node(b"anything"), None);
    }

    #[test]
    fn deterministic_across_builds() {
        let nodes = ["a", "b", "c"];
        let one = HashRing::with_equal_weights(nodes);
        let two = HashRing::with_equal_weights(nodes);
        assert_eq!(one.len(), two.len());
        for key in ["key-1", "key-2", "another-key"] {
            assert_eq!(one.get_node(key.as_bytes()), two.get_node(key.as_bytes()));
        }
    }

    #[test]
    fn equal_weights_give_roughly_equal_share() {
        let ring = HashRing::with_equal_weights(["a", "b"]);
        let mut hits: HashMap<String, u32> = HashMap::new();
        for i in 0..2000 {
            let node = ring.get_node(format!("key-{i}").as_bytes()).unwrap();
            *hits.entry(node.to_owned()).or_default() += 1;
        }
        let a = *hits.get("a").unwrap_or(&0) as f64;
        let b = *hits.get("b").unwrap_or(&0) as f64;
        let ratio = a / b;
        assert!((0.8..1.25).contains(&ratio), "unbalanced ring: {hits:?}");
    }

    #[test]
    fn covers_every_node_over_many_keys() {
        let nodes: Vec<SmolStr> = (1..=4).map(|i| SmolStr::new(format!("node{i:02}"))).collect();
        let ring = HashRing::with_equal_weights(nodes.clone());
        let mut seen: std::collections::HashSet<String> = Default::default();
        for i in 0..500 {
            let node = ring.get_node(format!("key-{i}").as_bytes()).unwrap();
            seen.insert(node.to_owned());
        }
        for node in &nodes {
            assert!(seen.contains(node.as_str()), "{node} never assigned");
        }
    }

    #[test]
    fn wraps_past_the_end() {
        let ring = HashRing::with_equal_weights(["only"]);
        // Every key must resolve since there is a single node.
        for key in ["a", "zzzzzzz", "\u{0}"] {
            assert_eq!(ring.get_node(key.as_bytes()), Some("only"));
        }
    }
}
