/// Token-level multi-vector index with late-interaction (MaxSim) scoring
use super::{finalize_hits, AdapterError, IndexAdapter, QueryVector, ScoredHit, SearchFilter, Signal};
use crate::corpus::{Chunk, ChunkId, DocumentId, TokenVectors};
use ahash::AHashMap;
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use std::sync::{PoisonError, RwLock};

struct TokenEntry {
    document_id: DocumentId,
    /// One L2-normalized row per token
    matrix: Array2<f32>,
}

#[derive(Default)]
struct TokenState {
    entries: AHashMap<ChunkId, TokenEntry>,
    /// Fixed by the first indexed chunk
    dimension: Option<usize>,
}

/// Late-interaction index over per-token vectors.
///
/// Score of a chunk is the sum, over query tokens, of the best cosine
/// similarity against any of the chunk's tokens.
#[derive(Default)]
pub struct TokenIndex {
    state: RwLock<TokenState>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token dimension, once known
    pub fn dimension(&self) -> Option<usize> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dimension
    }
}

/// Stack token vectors into a row-normalized matrix
fn to_matrix(tokens: &TokenVectors, dimension: usize) -> Option<Array2<f32>> {
    let flat: Vec<f32> = tokens.as_slice().iter().flatten().copied().collect();
    let mut matrix = Array2::from_shape_vec((tokens.len(), dimension), flat).ok()?;
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            row.mapv_inplace(|x| x / norm);
        }
    }
    Some(matrix)
}

/// Sum over query rows of the max similarity against document rows
fn max_sim(query: &Array2<f32>, document: &Array2<f32>) -> f32 {
    let similarities = query.dot(&document.t());
    similarities
        .axis_iter(Axis(0))
        .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .filter(|best| best.is_finite())
        .sum()
}

#[async_trait]
impl IndexAdapter for TokenIndex {
    fn signal(&self) -> Signal {
        Signal::Token
    }

    async fn search(
        &self,
        query: &QueryVector,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredHit>, AdapterError> {
        let QueryVector::Tokens(tokens) = query else {
            return Err(AdapterError::ShapeMismatch {
                signal: Signal::Token,
                expected: "ordered token vectors",
            });
        };
        if top_k == 0 {
            return Err(AdapterError::InvalidTopK);
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(dimension) = state.dimension else {
            return Ok(Vec::new());
        };
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let actual = tokens.dimension().ok_or(AdapterError::ShapeMismatch {
            signal: Signal::Token,
            expected: "token vectors of equal dimension",
        })?;
        if actual != dimension {
            return Err(AdapterError::InvalidDimension {
                signal: Signal::Token,
                expected: dimension,
                actual,
            });
        }
        let query = to_matrix(tokens, dimension).ok_or(AdapterError::ShapeMismatch {
            signal: Signal::Token,
            expected: "token vectors of equal dimension",
        })?;

        let hits = state
            .entries
            .iter()
            .filter(|(id, entry)| filter.allows(id, &entry.document_id))
            .map(|(id, entry)| ScoredHit::new(id.clone(), max_sim(&query, &entry.matrix)))
            .collect();

        Ok(finalize_hits(hits, top_k))
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), AdapterError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let tokens = match &chunk.tokens {
            Some(tokens) if !tokens.is_empty() => tokens,
            _ => {
                state.entries.remove(&chunk.id);
                return Ok(());
            }
        };

        let actual = tokens.dimension().ok_or(AdapterError::ShapeMismatch {
            signal: Signal::Token,
            expected: "token vectors of equal dimension",
        })?;
        let dimension = *state.dimension.get_or_insert(actual);
        if actual != dimension {
            return Err(AdapterError::InvalidDimension {
                signal: Signal::Token,
                expected: dimension,
                actual,
            });
        }

        let matrix = to_matrix(tokens, dimension).ok_or(AdapterError::ShapeMismatch {
            signal: Signal::Token,
            expected: "token vectors of equal dimension",
        })?;
        state.entries.insert(
            chunk.id.clone(),
            TokenEntry {
                document_id: chunk.document_id.clone(),
                matrix,
            },
        );

        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, AdapterError> {
        Ok(self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(chunk_id)
            .is_some())
    }

    fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}
