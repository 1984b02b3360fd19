//! Corpus data model: documents, chunks, sentence spans and the three
//! pre-computed similarity representations of each chunk.
//!
//! The retrieval core never parses or embeds content itself. Documents and
//! chunks arrive already segmented and encoded from the ingestion side and are
//! immutable once indexed; re-ingestion produces a new document version.

mod catalog;
mod ingest;

pub use catalog::ChunkCatalog;
pub use ingest::{load_jsonl, DocumentRecord, IngestError, IngestReport, Ingestor};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChunkId = String;
pub type DocumentId = String;

/// Byte-offset span of one sentence inside a chunk's text (end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentenceSpan {
    pub start: usize,
    pub end: usize,
}

impl SentenceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sparse lexical representation: unique term -> weight
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVector {
    weights: AHashMap<String, f32>,
}

impl SparseVector {
    pub fn from_map(weights: AHashMap<String, f32>) -> Self {
        Self { weights }
    }

    pub fn get(&self, term: &str) -> Option<f32> {
        self.weights.get(term).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.weights.iter().map(|(t, w)| (t.as_str(), *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Dot product over shared terms
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .weights
            .iter()
            .filter_map(|(term, w)| large.weights.get(term).map(|o| w * o))
            .sum()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        Self {
            weights: iter.into_iter().map(|(t, w)| (t.into(), w)).collect(),
        }
    }
}

/// Per-token vectors for late-interaction scoring. Order is significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenVectors {
    vectors: Vec<Vec<f32>>,
}

impl TokenVectors {
    pub fn new(vectors: Vec<Vec<f32>>) -> Self {
        Self { vectors }
    }

    pub fn as_slice(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Shared dimension of all token vectors, or `None` if empty or ragged
    pub fn dimension(&self) -> Option<usize> {
        let first = self.vectors.first()?.len();
        self.vectors
            .iter()
            .all(|v| v.len() == first)
            .then_some(first)
    }
}

/// One independently indexed piece of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,

    /// Parent document; filled from the enclosing record when loading JSONL
    #[serde(default)]
    pub document_id: DocumentId,

    pub text: String,

    /// Ordered, non-overlapping sentence spans over `text`
    #[serde(default)]
    pub sentences: Vec<SentenceSpan>,

    #[serde(default)]
    pub dense: Option<Vec<f32>>,

    #[serde(default)]
    pub sparse: Option<SparseVector>,

    #[serde(default)]
    pub tokens: Option<TokenVectors>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, document_id: impl Into<DocumentId>, text: impl Into<String>) -> Self {
        let text = text.into();
        let sentences = crate::text::sentence_spans(&text);
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text,
            sentences,
            dense: None,
            sparse: None,
            tokens: None,
        }
    }

    pub fn with_dense(mut self, dense: Vec<f32>) -> Self {
        self.dense = Some(dense);
        self
    }

    pub fn with_sparse(mut self, sparse: SparseVector) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn with_tokens(mut self, tokens: TokenVectors) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Text covered by `span`, if the span is one of this chunk's bounds-valid spans
    pub fn sentence_text(&self, span: SentenceSpan) -> Option<&str> {
        self.text.get(span.start..span.end)
    }

    /// Check spans and representations before the chunk is indexed.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.id.is_empty() {
            return Err(IngestError::InvalidChunk {
                chunk_id: self.id.clone(),
                reason: "chunk id cannot be empty".to_string(),
            });
        }

        let mut previous_end = 0;
        for span in &self.sentences {
            if span.is_empty() || span.start < previous_end || self.sentence_text(*span).is_none() {
                return Err(IngestError::InvalidChunk {
                    chunk_id: self.id.clone(),
                    reason: format!("invalid sentence span {}..{}", span.start, span.end),
                });
            }
            previous_end = span.end;
        }

        if let Some(tokens) = &self.tokens {
            if !tokens.is_empty() && tokens.dimension().is_none() {
                return Err(IngestError::InvalidChunk {
                    chunk_id: self.id.clone(),
                    reason: "token vectors have inconsistent dimensions".to_string(),
                });
            }
        }

        if self.dense.is_none() && self.sparse.is_none() && self.tokens.is_none() {
            return Err(IngestError::InvalidChunk {
                chunk_id: self.id.clone(),
                reason: "chunk has no similarity representation".to_string(),
            });
        }

        Ok(())
    }

    /// Content fingerprint (BLAKE3) over text, spans and representations.
    ///
    /// Two deliveries of the same chunk produce the same fingerprint, which
    /// makes repeated upserts no-ops.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.document_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.text.as_bytes());
        for span in &self.sentences {
            hasher.update(&(span.start as u64).to_le_bytes());
            hasher.update(&(span.end as u64).to_le_bytes());
        }
        if let Some(dense) = &self.dense {
            hasher.update(b"dense");
            for x in dense {
                hasher.update(&x.to_le_bytes());
            }
        }
        if let Some(sparse) = &self.sparse {
            hasher.update(b"sparse");
            let mut terms: Vec<(&str, f32)> = sparse.iter().collect();
            terms.sort_by(|a, b| a.0.cmp(b.0));
            for (term, weight) in terms {
                hasher.update(term.as_bytes());
                hasher.update(&weight.to_le_bytes());
            }
        }
        if let Some(tokens) = &self.tokens {
            hasher.update(b"tokens");
            for vector in tokens.as_slice() {
                hasher.update(&(vector.len() as u64).to_le_bytes());
                for x in vector {
                    hasher.update(&x.to_le_bytes());
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A source document as known to the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_uri: String,
    pub chunk_ids: Vec<ChunkId>,
    pub ingested_at: DateTime<Utc>,
    /// Fingerprint over the chunk fingerprints; changes on every new version
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_new_derives_sentences() {
        let chunk = Chunk::new("c1", "d1", "One. Two.").with_dense(vec![1.0]);
        assert_eq!(chunk.sentences.len(), 2);
        assert_eq!(chunk.sentence_text(chunk.sentences[1]), Some("Two."));
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_span() {
        let mut chunk = Chunk::new("c1", "d1", "short").with_dense(vec![1.0]);
        chunk.sentences = vec![SentenceSpan::new(0, 99)];
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_chunk_without_representations() {
        let chunk = Chunk::new("c1", "d1", "text");
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ragged_tokens() {
        let chunk = Chunk::new("c1", "d1", "text")
            .with_tokens(TokenVectors::new(vec![vec![1.0, 0.0], vec![1.0]]));
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = Chunk::new("c1", "d1", "text").with_dense(vec![0.5, 0.5]);
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = a.clone().with_dense(vec![0.5, 0.6]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_sparse_dot() {
        let a: SparseVector = [("fusion", 0.5), ("rank", 0.5)].into_iter().collect();
        let b: SparseVector = [("fusion", 1.0), ("other", 1.0)].into_iter().collect();
        assert!((a.dot(&b) - 0.5).abs() < 1e-6);
    }
}
