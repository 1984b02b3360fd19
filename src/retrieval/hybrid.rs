//! Hybrid retrieval across the dense, sparse and token signals

use crate::corpus::ChunkCatalog;
use crate::deadline::Deadline;
use crate::index::{
    IndexAdapter, LexicalEncoder, QueryEncoder, QueryRepresentation, ScoredHit, SearchFilter,
    Signal,
};
use crate::retrieval::{
    reciprocal_rank_fusion, FusedEntry, FusionConfig, RetrievalCandidate, RetrievalOutcome,
    SignalStatus,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("All retrieval signals unavailable: {}", format_reasons(.reasons))]
    Exhausted { reasons: BTreeMap<Signal, String> },
}

fn format_reasons(reasons: &BTreeMap<Signal, String>) -> String {
    reasons
        .iter()
        .map(|(signal, reason)| format!("{signal}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Tuning for one hybrid retriever
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub fusion: FusionConfig,

    /// Fused candidates handed to the reranker
    pub candidate_pool: usize,

    /// Hits requested from each adapter
    pub per_signal_limit: usize,

    /// Per-adapter call budget, further capped by the query deadline
    pub adapter_timeout: Duration,

    /// Query encoding budget; on expiry the query is encoded lexically
    pub encoder_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            candidate_pool: 50,
            per_signal_limit: 100,
            adapter_timeout: Duration::from_secs(2),
            encoder_timeout: Duration::from_secs(1),
        }
    }
}

/// Fans a query out to every configured signal and fuses the results.
///
/// A failing or slow adapter marks its signal unavailable for the query; the
/// query only fails when no signal answers at all.
pub struct HybridRetriever {
    encoder: Arc<dyn QueryEncoder>,
    adapters: BTreeMap<Signal, Arc<dyn IndexAdapter>>,
    catalog: Arc<ChunkCatalog>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(
        encoder: Arc<dyn QueryEncoder>,
        adapters: Vec<Arc<dyn IndexAdapter>>,
        catalog: Arc<ChunkCatalog>,
        settings: RetrievalSettings,
    ) -> Self {
        let mut by_signal = BTreeMap::new();
        for adapter in adapters {
            let signal = adapter.signal();
            if by_signal.insert(signal, adapter).is_some() {
                warn!("Multiple {} adapters configured, keeping the last one", signal);
            }
        }

        Self {
            encoder,
            adapters: by_signal,
            catalog,
            settings,
        }
    }

    pub fn catalog(&self) -> &Arc<ChunkCatalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Retrieve up to `candidate_pool` fused candidates for a query
    pub async fn retrieve(
        &self,
        query: &str,
        filter: &SearchFilter,
        deadline: Deadline,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        // Step 1: Encode the query for every signal
        let representation = self.encode(query, deadline).await;

        // Step 2: Parallel search across all signals
        let searches = Signal::ALL
            .into_iter()
            .map(|signal| self.search_signal(signal, &representation, filter, deadline));
        let results = join_all(searches).await;

        let mut signals = BTreeMap::new();
        let mut lists = Vec::new();
        for (signal, result) in results {
            match result {
                Ok(hits) => {
                    debug!("{} signal returned {} hits", signal, hits.len());
                    signals.insert(signal, SignalStatus::Contributed { hits: hits.len() });
                    lists.push((signal, hits));
                }
                Err(reason) => {
                    warn!(signal = %signal, reason = %reason, "Retrieval signal unavailable");
                    signals.insert(signal, SignalStatus::Unavailable { reason });
                }
            }
        }

        if lists.is_empty() {
            let reasons = signals
                .into_iter()
                .filter_map(|(signal, status)| match status {
                    SignalStatus::Unavailable { reason } => Some((signal, reason)),
                    SignalStatus::Contributed { .. } => None,
                })
                .collect();
            return Err(RetrievalError::Exhausted { reasons });
        }

        // Step 3: Reciprocal Rank Fusion
        let fused = reciprocal_rank_fusion(lists, &self.settings.fusion);

        // Step 4: Hydrate chunks from the catalog
        let candidates = self.hydrate(fused);

        Ok(RetrievalOutcome {
            candidates,
            signals,
        })
    }

    /// Encode with the configured encoder, degrading to lexical-only on failure
    async fn encode(&self, query: &str, deadline: Deadline) -> QueryRepresentation {
        let budget = deadline.budget(self.settings.encoder_timeout);
        match tokio::time::timeout(budget, self.encoder.encode(query)).await {
            Ok(Ok(representation)) => return representation,
            Ok(Err(e)) => warn!(
                encoder = self.encoder.name(),
                error = %e,
                "Query encoder failed, falling back to lexical encoding"
            ),
            Err(_) => warn!(
                encoder = self.encoder.name(),
                "Query encoder timed out, falling back to lexical encoding"
            ),
        }

        LexicalEncoder.encode(query).await.unwrap_or_default()
    }

    async fn search_signal(
        &self,
        signal: Signal,
        representation: &QueryRepresentation,
        filter: &SearchFilter,
        deadline: Deadline,
    ) -> (Signal, Result<Vec<ScoredHit>, String>) {
        let Some(adapter) = self.adapters.get(&signal) else {
            return (signal, Err("no adapter configured".to_string()));
        };
        let Some(query) = representation.for_signal(signal) else {
            return (signal, Err("no query representation".to_string()));
        };

        let budget = deadline.budget(self.settings.adapter_timeout);
        if budget.is_zero() {
            return (signal, Err("deadline exceeded".to_string()));
        }

        let search = adapter.search(&query, self.settings.per_signal_limit, filter);
        let result = match tokio::time::timeout(budget, search).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", budget.as_millis())),
        };

        (signal, result)
    }

    fn hydrate(&self, fused: Vec<FusedEntry>) -> Vec<RetrievalCandidate> {
        let mut candidates = Vec::with_capacity(self.settings.candidate_pool.min(fused.len()));

        for entry in fused {
            if candidates.len() >= self.settings.candidate_pool {
                break;
            }
            match self.catalog.get(&entry.chunk_id) {
                Some(chunk) => candidates.push(RetrievalCandidate::new(
                    chunk,
                    entry.ranks,
                    entry.fused_score,
                )),
                None => debug!("Chunk {} not in catalog, skipping", entry.chunk_id),
            }
        }

        candidates
    }
}
