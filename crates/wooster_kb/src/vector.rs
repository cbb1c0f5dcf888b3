//! In-process vector index.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Nearest-neighbor index over block embeddings.
///
/// The index is pluggable so a deployment can swap in an ANN backend; the
/// built-in [`FlatIndex`] scans exhaustively, which is exact and fast enough
/// for personal-note corpora (tens of thousands of blocks).
pub trait VectorIndex: Send + Sync + 'static {
    /// Inserts or replaces the vector for a block.
    fn insert(&self, block_id: String, vector: Vec<f32>);

    /// Removes a block's vector.
    fn remove(&self, block_id: &str);

    /// Returns up to `k` `(block_id, cosine_similarity)` pairs, best first.
    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    /// Whether the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every vector.
    fn clear(&self);
}

/// Exhaustive cosine-similarity index.
#[derive(Default)]
pub struct FlatIndex {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl FlatIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-loads vectors, replacing the current contents.
    pub fn load(&self, entries: Vec<(String, Vec<f32>)>) {
        let mut vectors = self.vectors.write();
        vectors.clear();
        vectors.extend(entries);
    }
}

impl VectorIndex for FlatIndex {
    fn insert(&self, block_id: String, vector: Vec<f32>) {
        self.vectors.write().insert(block_id, vector);
    }

    fn remove(&self, block_id: &str) {
        self.vectors.write().remove(block_id);
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(String, f32)> = vectors
            .iter()
            .filter_map(|(id, vector)| {
                cosine_similarity(query, vector).map(|score| (id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(core::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn len(&self) -> usize {
        self.vectors.read().len()
    }

    fn clear(&self) {
        self.vectors.write().clear();
    }
}

impl core::fmt::Debug for FlatIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlatIndex").field("len", &self.len()).finish()
    }
}

/// Cosine similarity; `None` for mismatched dimensions or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
