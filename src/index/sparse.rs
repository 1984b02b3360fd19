/// Sparse lexical index: term -> weight postings with dot-product scoring
use super::{finalize_hits, AdapterError, IndexAdapter, QueryVector, ScoredHit, SearchFilter, Signal};
use crate::corpus::{Chunk, ChunkId, DocumentId};
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

struct SparseEntry {
    document_id: DocumentId,
    terms: Vec<String>,
}

#[derive(Default)]
struct SparseState {
    postings: AHashMap<String, AHashMap<ChunkId, f32>>,
    entries: AHashMap<ChunkId, SparseEntry>,
}

impl SparseState {
    fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(entry) = self.entries.remove(chunk_id) else {
            return false;
        };
        for term in entry.terms {
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(chunk_id);
                if posting.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }
}

/// Inverted index over pre-computed sparse vectors.
///
/// A chunk matches when it shares at least one term with the query; its raw
/// score is the dot product of the two term-weight maps.
#[derive(Default)]
pub struct SparseIndex {
    state: RwLock<SparseState>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct terms in the vocabulary
    pub fn vocabulary_size(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .postings
            .len()
    }
}

#[async_trait]
impl IndexAdapter for SparseIndex {
    fn signal(&self) -> Signal {
        Signal::Sparse
    }

    async fn search(
        &self,
        query: &QueryVector,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredHit>, AdapterError> {
        let QueryVector::Sparse(query) = query else {
            return Err(AdapterError::ShapeMismatch {
                signal: Signal::Sparse,
                expected: "term-weight map",
            });
        };
        if top_k == 0 {
            return Err(AdapterError::InvalidTopK);
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut scores: AHashMap<&str, f32> = AHashMap::new();
        for (term, query_weight) in query.iter() {
            let Some(posting) = state.postings.get(term) else {
                continue;
            };
            for (chunk_id, weight) in posting {
                *scores.entry(chunk_id.as_str()).or_insert(0.0) += query_weight * weight;
            }
        }

        let hits = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .filter(|(id, _)| {
                state
                    .entries
                    .get(*id)
                    .is_some_and(|entry| filter.allows(id, &entry.document_id))
            })
            .map(|(id, score)| ScoredHit::new(id, score))
            .collect();

        Ok(finalize_hits(hits, top_k))
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), AdapterError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remove(&chunk.id);

        let Some(sparse) = &chunk.sparse else {
            return Ok(());
        };

        let mut terms = Vec::with_capacity(sparse.len());
        for (term, weight) in sparse.iter() {
            if weight == 0.0 {
                continue;
            }
            state
                .postings
                .entry(term.to_string())
                .or_default()
                .insert(chunk.id.clone(), weight);
            terms.push(term.to_string());
        }
        state.entries.insert(
            chunk.id.clone(),
            SparseEntry {
                document_id: chunk.document_id.clone(),
                terms,
            },
        );

        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, AdapterError> {
        Ok(self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chunk_id))
    }

    fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SparseVector;

    fn chunk(id: &str, terms: &[(&str, f32)]) -> Chunk {
        let sparse: SparseVector = terms.iter().map(|(t, w)| (*t, *w)).collect();
        Chunk::new(id, "d1", "text").with_sparse(sparse)
    }

    fn query(terms: &[(&str, f32)]) -> QueryVector {
        QueryVector::Sparse(terms.iter().map(|(t, w)| (*t, *w)).collect())
    }

    #[tokio::test]
    async fn test_only_overlapping_chunks_match() {
        let index = SparseIndex::new();
        index
            .upsert(&chunk("c1", &[("fusion", 0.8), ("rank", 0.2)]))
            .await
            .unwrap();
        index.upsert(&chunk("c2", &[("rank", 0.9)])).await.unwrap();
        index.upsert(&chunk("c3", &[("other", 1.0)])).await.unwrap();

        let hits = index
            .search(&query(&[("fusion", 1.0), ("rank", 0.5)]), 10, &SearchFilter::none())
            .await
            .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!((hits[0].score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_removes_postings() {
        let index = SparseIndex::new();
        index.upsert(&chunk("c1", &[("fusion", 1.0)])).await.unwrap();
        assert!(index.delete("c1").await.unwrap());

        let hits = index
            .search(&query(&[("fusion", 1.0)]), 10, &SearchFilter::none())
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(index.vocabulary_size(), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_terms() {
        let index = SparseIndex::new();
        index.upsert(&chunk("c1", &[("old", 1.0)])).await.unwrap();
        index.upsert(&chunk("c1", &[("new", 1.0)])).await.unwrap();

        let old = index
            .search(&query(&[("old", 1.0)]), 10, &SearchFilter::none())
            .await
            .unwrap();
        assert!(old.is_empty());
        assert_eq!(index.len(), 1);
    }
}
