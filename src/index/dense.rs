//! Dense embedding index: exact cosine scan for small corpora, HNSW above a threshold
use super::{
    finalize_hits, l2_normalize, AdapterError, IndexAdapter, QueryVector, ScoredHit,
    SearchFilter, Signal,
};
use crate::corpus::{Chunk, ChunkId, DocumentId};
use ahash::AHashMap;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::sync::{PoisonError, RwLock};

/// HNSW has at most 16 layers
const HNSW_MAX_LAYER: usize = 16;
/// Minimum tombstone count before the graph is rebuilt
const COMPACTION_FLOOR: usize = 64;

/// HNSW construction/search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Number of connections per layer
    pub m: usize,
    /// Construction beam width (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Search beam width (higher = better recall, slower search)
    pub ef_search: usize,
    /// Capacity hint for graph allocation
    pub capacity: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            capacity: 100_000,
        }
    }
}

struct DenseEntry {
    slot: usize,
    document_id: DocumentId,
    vector: Vec<f32>,
}

#[derive(Default)]
struct DenseState {
    entries: AHashMap<ChunkId, DenseEntry>,
    /// HNSW data id -> chunk id; slots missing here are tombstones
    slots: AHashMap<usize, ChunkId>,
    next_slot: usize,
    tombstones: usize,
}

/// Dense vector index
///
/// Vectors are L2-normalized on insert so cosine similarity is a dot product.
/// The HNSW graph cannot delete points, so replaced or deleted vectors become
/// tombstones that are filtered at search time and dropped on compaction.
pub struct DenseIndex {
    dimension: usize,
    exhaustive_threshold: usize,
    params: HnswParams,
    graph: RwLock<Hnsw<'static, f32, DistCosine>>,
    state: RwLock<DenseState>,
}

impl DenseIndex {
    /// Create a new dense index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match the embedding model)
    /// * `exhaustive_threshold` - Up to this many vectors, search is an exact scan
    /// * `params` - HNSW parameters used above the threshold
    pub fn new(dimension: usize, exhaustive_threshold: usize, params: HnswParams) -> Self {
        Self {
            dimension,
            exhaustive_threshold,
            params,
            graph: RwLock::new(Self::new_graph(&params)),
            state: RwLock::new(DenseState::default()),
        }
    }

    fn new_graph(params: &HnswParams) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::<f32, DistCosine>::new(
            params.m,
            params.capacity,
            HNSW_MAX_LAYER,
            params.ef_construction,
            DistCosine,
        )
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Exact scan while `live <= exhaustive_threshold`; filtered searches
    /// always scan since the graph cannot apply the filter.
    fn uses_exact_scan(&self, live: usize, filter: &SearchFilter) -> bool {
        live <= self.exhaustive_threshold || !filter.is_unrestricted()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), AdapterError> {
        if actual != self.dimension {
            return Err(AdapterError::InvalidDimension {
                signal: Signal::Dense,
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    fn exact_search(
        state: &DenseState,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Vec<ScoredHit> {
        let hits = state
            .entries
            .iter()
            .filter(|(id, entry)| filter.allows(id, &entry.document_id))
            .map(|(id, entry)| ScoredHit::new(id.clone(), dot(query, &entry.vector)))
            .collect();
        finalize_hits(hits, top_k)
    }

    fn approximate_search(&self, state: &DenseState, query: &[f32], top_k: usize) -> Vec<ScoredHit> {
        let fetch = top_k + state.tombstones;
        let ef = self.params.ef_search.max(fetch);
        let graph = self.graph.read().unwrap_or_else(PoisonError::into_inner);

        let hits = graph
            .search(query, fetch, ef)
            .into_iter()
            .filter_map(|neighbour| {
                state
                    .slots
                    .get(&neighbour.d_id)
                    .map(|id| ScoredHit::new(id.clone(), 1.0 - neighbour.distance))
            })
            .collect();
        finalize_hits(hits, top_k)
    }

    fn remove_entry(state: &mut DenseState, chunk_id: &str) -> bool {
        match state.entries.remove(chunk_id) {
            Some(entry) => {
                state.slots.remove(&entry.slot);
                state.tombstones += 1;
                true
            }
            None => false,
        }
    }

    /// Rebuild the graph from live entries once tombstones dominate it
    fn maybe_compact(&self, state: &mut DenseState) {
        if state.tombstones < COMPACTION_FLOOR || state.tombstones <= state.entries.len() {
            return;
        }

        tracing::debug!(
            "Compacting dense index: {} live, {} tombstones",
            state.entries.len(),
            state.tombstones
        );

        let graph = Self::new_graph(&self.params);
        state.slots.clear();
        for (slot, (id, entry)) in state.entries.iter_mut().enumerate() {
            entry.slot = slot;
            graph.insert((&entry.vector, slot));
            state.slots.insert(slot, id.clone());
        }
        state.next_slot = state.entries.len();
        state.tombstones = 0;

        *self.graph.write().unwrap_or_else(PoisonError::into_inner) = graph;
    }
}

#[async_trait]
impl IndexAdapter for DenseIndex {
    fn signal(&self) -> Signal {
        Signal::Dense
    }

    async fn search(
        &self,
        query: &QueryVector,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredHit>, AdapterError> {
        let QueryVector::Dense(vector) = query else {
            return Err(AdapterError::ShapeMismatch {
                signal: Signal::Dense,
                expected: "fixed-length dense vector",
            });
        };
        if top_k == 0 {
            return Err(AdapterError::InvalidTopK);
        }
        self.check_dimension(vector.len())?;

        let mut query = vector.clone();
        l2_normalize(&mut query);

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.entries.is_empty() {
            return Ok(Vec::new());
        }

        let hits = if self.uses_exact_scan(state.entries.len(), filter) {
            Self::exact_search(&state, &query, top_k, filter)
        } else {
            self.approximate_search(&state, &query, top_k)
        };
        Ok(hits)
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), AdapterError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let Some(dense) = &chunk.dense else {
            // No dense representation: the chunk stays reachable via the other signals
            Self::remove_entry(&mut state, &chunk.id);
            return Ok(());
        };
        self.check_dimension(dense.len())?;

        let mut vector = dense.clone();
        l2_normalize(&mut vector);

        Self::remove_entry(&mut state, &chunk.id);
        let slot = state.next_slot;
        state.next_slot += 1;

        self.graph
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((&vector, slot));

        state.slots.insert(slot, chunk.id.clone());
        state.entries.insert(
            chunk.id.clone(),
            DenseEntry {
                slot,
                document_id: chunk.document_id.clone(),
                vector,
            },
        );
        self.maybe_compact(&mut state);

        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, AdapterError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = Self::remove_entry(&mut state, chunk_id);
        self.maybe_compact(&mut state);
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn chunk(id: &str, doc: &str, dense: Vec<f32>) -> Chunk {
        Chunk::new(id, doc, format!("text of {id}")).with_dense(dense)
    }

    #[test]
    fn test_exact_scan_up_to_threshold_inclusive() {
        let index = DenseIndex::new(4, 3, HnswParams::default());
        assert!(index.uses_exact_scan(3, &SearchFilter::none()));
        assert!(!index.uses_exact_scan(4, &SearchFilter::none()));
        assert!(index.uses_exact_scan(4, &SearchFilter::documents(["d1"])));
    }

    #[tokio::test]
    async fn test_exact_search_orders_by_similarity() {
        let index = DenseIndex::new(4, 10_000, HnswParams::default());
        index.upsert(&chunk("c1", "d1", unit(4, 0))).await.unwrap();
        index.upsert(&chunk("c2", "d1", unit(4, 1))).await.unwrap();
        index
            .upsert(&chunk("c3", "d2", vec![0.9, 0.1, 0.0, 0.0]))
            .await
            .unwrap();

        let hits = index
            .search(&QueryVector::Dense(unit(4, 0)), 2, &SearchFilter::none())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].chunk_id, "c3");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_ties_broken_by_chunk_id() {
        let index = DenseIndex::new(2, 10_000, HnswParams::default());
        index.upsert(&chunk("b", "d1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&chunk("a", "d1", vec![2.0, 0.0])).await.unwrap();

        let hits = index
            .search(&QueryVector::Dense(vec![1.0, 0.0]), 5, &SearchFilter::none())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_approximate_search_skips_deleted() {
        let index = DenseIndex::new(8, 0, HnswParams::default());
        for i in 0..8 {
            index
                .upsert(&chunk(&format!("c{i}"), "d1", unit(8, i)))
                .await
                .unwrap();
        }
        assert!(index.delete("c3").await.unwrap());
        assert!(!index.delete("c3").await.unwrap());

        let hits = index
            .search(&QueryVector::Dense(unit(8, 3)), 8, &SearchFilter::none())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.chunk_id != "c3"));
        assert_eq!(index.len(), 7);
    }

    #[tokio::test]
    async fn test_upsert_replaces_vector() {
        let index = DenseIndex::new(2, 10_000, HnswParams::default());
        index.upsert(&chunk("c1", "d1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&chunk("c1", "d1", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.len(), 1);

        let hits = index
            .search(&QueryVector::Dense(vec![0.0, 1.0]), 1, &SearchFilter::none())
            .await
            .unwrap();
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_filter_restricts_documents() {
        let index = DenseIndex::new(2, 10_000, HnswParams::default());
        index.upsert(&chunk("c1", "d1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&chunk("c2", "d2", vec![1.0, 0.1])).await.unwrap();

        let hits = index
            .search(
                &QueryVector::Dense(vec![1.0, 0.0]),
                5,
                &SearchFilter::documents(["d2"]),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn test_rejects_wrong_shape_and_dimension() {
        let index = DenseIndex::new(4, 10_000, HnswParams::default());
        let wrong_dim = index.upsert(&chunk("c1", "d1", vec![1.0; 3])).await;
        assert!(matches!(wrong_dim, Err(AdapterError::InvalidDimension { .. })));

        let shape = index
            .search(
                &QueryVector::Sparse(Default::default()),
                1,
                &SearchFilter::none(),
            )
            .await;
        assert!(matches!(shape, Err(AdapterError::ShapeMismatch { .. })));

        let top_k = index
            .search(&QueryVector::Dense(vec![1.0; 4]), 0, &SearchFilter::none())
            .await;
        assert!(matches!(top_k, Err(AdapterError::InvalidTopK)));
    }
}
