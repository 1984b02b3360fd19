//! Vector index adapters
//!
//! One uniform contract over the three similarity signals:
//! - `DenseIndex`: fixed-length embeddings, cosine similarity (exact scan or HNSW)
//! - `SparseIndex`: term -> weight maps, inverted index with dot-product scoring
//! - `TokenIndex`: per-token vectors, late-interaction (MaxSim) scoring
//!
//! Adapters are stateless wrappers over their backing index: they never see
//! chunk text, only ids, document ids and one representation.

mod dense;
mod encoder;
mod sparse;
mod token;

pub use dense::{DenseIndex, HnswParams};
pub use encoder::{EncodeError, LexicalEncoder, ModelQueryEncoder, QueryEncoder, QueryRepresentation};
pub use sparse::SparseIndex;
pub use token::TokenIndex;

use crate::corpus::{Chunk, ChunkId, DocumentId, SparseVector, TokenVectors};
use ahash::AHashSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// The three retrieval signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Dense,
    Sparse,
    Token,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Dense, Signal::Sparse, Signal::Token];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Dense => "dense",
            Signal::Sparse => "sparse",
            Signal::Token => "token",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("{signal} index unavailable: {reason}")]
    Unavailable { signal: Signal, reason: String },

    #[error("{signal} index expects a {expected} query representation")]
    ShapeMismatch { signal: Signal, expected: &'static str },

    #[error("{signal} index: invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension {
        signal: Signal,
        expected: usize,
        actual: usize,
    },

    #[error("top_k must be at least 1")]
    InvalidTopK,
}

impl AdapterError {
    pub fn unavailable(signal: Signal, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            signal,
            reason: reason.into(),
        }
    }
}

/// Query representation in the shape one adapter expects
#[derive(Debug, Clone)]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
    Tokens(TokenVectors),
}

impl QueryVector {
    pub fn signal(&self) -> Signal {
        match self {
            QueryVector::Dense(_) => Signal::Dense,
            QueryVector::Sparse(_) => Signal::Sparse,
            QueryVector::Tokens(_) => Signal::Token,
        }
    }
}

/// One adapter result: chunk id and signal-specific raw score (higher is better)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

impl ScoredHit {
    pub fn new(chunk_id: impl Into<ChunkId>, score: f32) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// Restrict a search to some documents and/or exclude specific chunks
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub documents: Option<AHashSet<DocumentId>>,
    pub exclude_chunks: AHashSet<ChunkId>,
}

impl SearchFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        Self {
            documents: Some(ids.into_iter().map(Into::into).collect()),
            exclude_chunks: AHashSet::new(),
        }
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ChunkId>,
    {
        self.exclude_chunks.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.documents.is_none() && self.exclude_chunks.is_empty()
    }

    pub fn allows(&self, chunk_id: &str, document_id: &str) -> bool {
        if self.exclude_chunks.contains(chunk_id) {
            return false;
        }
        self.documents
            .as_ref()
            .map_or(true, |docs| docs.contains(document_id))
    }
}

/// Uniform contract over one similarity signal.
///
/// `search` results are sorted by descending score, ties broken by ascending
/// chunk id. A chunk lacking this adapter's representation is simply absent
/// from it.
#[async_trait]
pub trait IndexAdapter: Send + Sync {
    /// Which signal this adapter serves
    fn signal(&self) -> Signal;

    async fn search(
        &self,
        query: &QueryVector,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredHit>, AdapterError>;

    /// Insert or replace the chunk's representation for this signal
    async fn upsert(&self, chunk: &Chunk) -> Result<(), AdapterError>;

    /// Remove a chunk; returns whether it was present
    async fn delete(&self, chunk_id: &str) -> Result<bool, AdapterError>;

    /// Number of live entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic result order: score descending, then chunk id ascending
pub fn compare_hits(a: &ScoredHit, b: &ScoredHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

pub(crate) fn finalize_hits(mut hits: Vec<ScoredHit>, top_k: usize) -> Vec<ScoredHit> {
    hits.sort_by(compare_hits);
    hits.truncate(top_k);
    hits
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_hits_breaks_ties_by_id() {
        let hits = vec![
            ScoredHit::new("c3", 0.5),
            ScoredHit::new("c1", 0.5),
            ScoredHit::new("c2", 0.9),
        ];
        let sorted = finalize_hits(hits, 2);
        let ids: Vec<&str> = sorted.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }

    #[test]
    fn test_filter_allows() {
        let filter = SearchFilter::documents(["d1"]).excluding(["c2"]);
        assert!(filter.allows("c1", "d1"));
        assert!(!filter.allows("c2", "d1"));
        assert!(!filter.allows("c3", "d2"));
        assert!(SearchFilter::none().allows("anything", "anywhere"));
    }
}
