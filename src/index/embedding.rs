//! Embedding-similarity index
//!
//! Values are embedded as hashed bag-of-words vectors, L2-normalized, and
//! queried by cosine similarity. Deliberately dependency-free: the point
//! is the observer plumbing, not embedding quality.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use super::{tokenize, ApplyObserver};

/// Embedding dimensionality
const DIM: usize = 64;

/// Hashed bag-of-words vector index
pub struct EmbeddingIndex {
    vectors: RwLock<HashMap<String, [f32; DIM]>>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        EmbeddingIndex {
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn index_value(&self, key: &str, value: &str) {
        let vector = embed(value);
        self.vectors.write().insert(key.to_string(), vector);
    }

    pub fn remove_key(&self, key: &str) {
        self.vectors.write().remove(key);
    }

    /// Top-k keys by cosine similarity to the query, descending.
    /// Ties break on key order so results are stable.
    pub fn search_similar(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        let query_vec = embed(query);
        let vectors = self.vectors.read();

        let mut scored: Vec<(String, f32)> = vectors
            .iter()
            .map(|(key, vec)| (key.clone(), dot(&query_vec, vec)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }
}

impl Default for EmbeddingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyObserver for EmbeddingIndex {
    fn on_apply(&self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => self.index_value(key, value),
            None => self.remove_key(key),
        }
    }
}

/// Hash each token into a bucket, count, then L2-normalize.
fn embed(text: &str) -> [f32; DIM] {
    let mut vec = [0.0f32; DIM];
    for token in tokenize(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vec[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
    vec
}

fn dot(a: &[f32; DIM], b: &[f32; DIM]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_value_scores_highest() {
        let index = EmbeddingIndex::new();
        index.index_value("a", "red apple pie");
        index.index_value("b", "blue whale song");

        let results = index.search_similar("red apple pie", 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 > results[1].1);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_top_k_truncation_and_removal() {
        let index = EmbeddingIndex::new();
        for i in 0..5 {
            index.index_value(&format!("k{}", i), "shared words here");
        }
        assert_eq!(index.search_similar("shared", 3).len(), 3);

        index.remove_key("k0");
        let results = index.search_similar("shared", 10);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(k, _)| k != "k0"));
    }
}
