//! In-memory vector index with cosine similarity search.
//!
//! Stores meal embeddings and provides exact similarity search.

use std::collections::HashMap;

/// Nearest-neighbor lookup over catalog vectors.
///
/// The only capability the search path needs from an index. Implementations
/// must accept vectors of exactly the encoder's dimension and rank
/// consistently across calls.
pub trait NearestNeighborIndex: Send + Sync {
    /// Up to `k` results, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError>;

    /// Version tag of the model the indexed vectors came from, if known.
    fn model_id(&self) -> Option<[u8; 32]> {
        None
    }
}

/// An entry in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// Hash of the normalized text that was embedded
    pub content_hash: u64,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// In-memory vector index keyed by meal ID.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: HashMap<u64, VectorEntry>,
    dimensions: usize,
}

/// Search result from a nearest-neighbor index.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchResult {
    /// Meal ID
    pub id: u64,
    /// Cosine similarity score
    pub score: f32,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry.
    ///
    /// Rejects vectors of the wrong dimension and zero-norm vectors.
    pub fn insert(
        &mut self,
        id: u64,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        Self::validate(self.dimensions, &embedding)?;

        self.entries.insert(
            id,
            VectorEntry {
                content_hash,
                embedding,
            },
        );

        Ok(())
    }

    /// Check a vector without inserting it.
    pub fn validate(dimensions: usize, embedding: &[f32]) -> Result<(), IndexError> {
        if embedding.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: embedding.len(),
            });
        }

        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteValue);
        }

        if Self::l2_norm(embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<VectorEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&VectorEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(u64, &VectorEntry) -> bool) {
        self.entries.retain(|id, entry| keep(*id, entry));
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Search for similar vectors using cosine similarity.
    ///
    /// Returns at most `limit` results with a score of at least `threshold`,
    /// sorted by score (highest first). Ties are broken by ascending ID so
    /// that identical queries always rank identically.
    pub fn search(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        if self.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                let score = Self::cosine_similarity(query, &entry.embedding, query_norm);
                if score >= threshold {
                    Some(SearchResult { id: *id, score })
                } else {
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        results.truncate(limit);

        Ok(results)
    }

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Assumes query_norm is precomputed.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector contains NaN or infinite values")]
    NonFiniteValue,

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}
