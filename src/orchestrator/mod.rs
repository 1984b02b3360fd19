//! Query orchestration: the single `answer` entry point
//!
//! Drives each query through retrieval, reranking, citation and generation
//! under one deadline, with a hard cap on queries in flight.

mod prompt;
mod stage;

pub use prompt::build_prompt;
pub use stage::{QueryStage, StageTransition};

use crate::config::Config;
use crate::corpus::{ChunkCatalog, ChunkId};
use crate::deadline::Deadline;
use crate::error::ErrorKind;
use crate::generation::{
    FailoverRouter, GenerationProvider, GenerationRequest, ProviderAttempt, RouterError, TokenUsage,
};
use crate::index::{IndexAdapter, QueryEncoder, SearchFilter, Signal};
use crate::retrieval::{
    BoostRules, CitationExtractor, HybridRetriever, RerankService, Reranker, RetrievalError,
    SegmentCitation, SignalStatus,
};
use serde::Serialize;
use stage::StageTracker;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

/// Caller-visible query failure, tagged with the stage that failed
#[derive(Error, Debug, Clone)]
pub enum AnswerError {
    #[error("Overloaded: {limit} queries already in flight")]
    Overloaded { limit: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No grounding available: {reason}")]
    NoGrounding {
        reason: String,
        signals: BTreeMap<Signal, String>,
    },

    #[error(transparent)]
    ProvidersUnavailable(RouterError),

    #[error("Deadline exceeded while {stage}")]
    Timeout { stage: QueryStage },
}

impl AnswerError {
    /// Stage in which the query failed
    pub fn stage(&self) -> QueryStage {
        match self {
            AnswerError::Overloaded { .. } | AnswerError::InvalidQuery(_) => QueryStage::Received,
            AnswerError::NoGrounding { .. } => QueryStage::Retrieving,
            AnswerError::ProvidersUnavailable(_) => QueryStage::Generating,
            AnswerError::Timeout { stage } => *stage,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnswerError::Overloaded { .. } => ErrorKind::Overloaded,
            AnswerError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            AnswerError::NoGrounding { .. } => ErrorKind::RetrievalExhausted,
            AnswerError::ProvidersUnavailable(_) => ErrorKind::AllProvidersUnavailable,
            AnswerError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether the same query may succeed if submitted again later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AnswerError::InvalidQuery(_))
    }
}

/// Everything the caller learns about how an answer was produced
#[derive(Debug, Clone, Serialize)]
pub struct AnswerMetadata {
    pub query_id: Uuid,
    pub signals: BTreeMap<Signal, SignalStatus>,
    pub contributing_signals: Vec<Signal>,
    pub rerank_skipped: bool,
    pub rerank_skip_reason: Option<String>,
    pub provider: String,
    pub provider_attempts: Vec<ProviderAttempt>,
    pub usage: TokenUsage,
    /// Chunks placed in the generation context, in passage order
    pub context_chunks: Vec<ChunkId>,
    pub latency_ms: u64,
    pub transitions: Vec<StageTransition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// One entry per answer sentence, in answer order
    pub citations: Vec<SegmentCitation>,
    pub metadata: AnswerMetadata,
}

impl Answer {
    /// Fraction of answer segments backed by a citation
    pub fn support_ratio(&self) -> f32 {
        if self.citations.is_empty() {
            return 0.0;
        }
        let supported = self.citations.iter().filter(|c| c.is_supported()).count();
        supported as f32 / self.citations.len() as f32
    }
}

/// One query as submitted by a caller
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub deadline: Option<Duration>,
    pub filter: SearchFilter,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            deadline: None,
            filter: SearchFilter::none(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_in_flight: usize,
    pub default_top_k: usize,
    pub default_deadline: Duration,
    pub max_answer_tokens: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            default_top_k: 8,
            default_deadline: Duration::from_secs(30),
            max_answer_tokens: 512,
        }
    }
}

/// External collaborators the orchestrator is assembled from
pub struct Components {
    pub encoder: Arc<dyn QueryEncoder>,
    pub adapters: Vec<Arc<dyn IndexAdapter>>,
    pub catalog: Arc<ChunkCatalog>,
    pub rerank_service: Option<Arc<dyn RerankService>>,
    /// In priority order
    pub providers: Vec<Arc<dyn GenerationProvider>>,
}

pub struct QueryOrchestrator {
    retriever: HybridRetriever,
    reranker: Reranker,
    citations: CitationExtractor,
    router: Arc<FailoverRouter>,
    in_flight: Arc<Semaphore>,
    settings: OrchestratorSettings,
}

impl QueryOrchestrator {
    pub fn new(
        retriever: HybridRetriever,
        reranker: Reranker,
        citations: CitationExtractor,
        router: Arc<FailoverRouter>,
        settings: OrchestratorSettings,
    ) -> Self {
        let max_in_flight = settings.max_in_flight.max(1);
        Self {
            retriever,
            reranker,
            citations,
            router,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            settings: OrchestratorSettings {
                max_in_flight,
                ..settings
            },
        }
    }

    /// Assemble from a validated configuration
    pub fn from_config(config: &Config, components: Components) -> crate::error::Result<Self> {
        let retriever = HybridRetriever::new(
            components.encoder,
            components.adapters,
            components.catalog,
            config.retrieval.settings()?,
        );

        let boosts = BoostRules::compile(&config.rerank.boosts)?;
        let service = if config.rerank.enabled {
            components.rerank_service
        } else {
            None
        };
        let reranker = Reranker::new(
            service,
            boosts,
            config.rerank.batch_limit,
            config.rerank.timeout(),
        );

        let citations = CitationExtractor::new(
            config.citation.min_confidence,
            config.citation.max_context_chunks,
        );
        let router = Arc::new(FailoverRouter::new(
            components.providers,
            config.circuit.policy(),
        ));

        Ok(Self::new(
            retriever,
            reranker,
            citations,
            router,
            config.orchestrator.settings(),
        ))
    }

    pub fn router(&self) -> &Arc<FailoverRouter> {
        &self.router
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Queries currently holding an in-flight slot
    pub fn in_flight(&self) -> usize {
        self.settings.max_in_flight - self.in_flight.available_permits()
    }

    /// Answer a query from the indexed corpus
    pub async fn answer(
        &self,
        query: &str,
        top_k: usize,
        deadline: Duration,
    ) -> Result<Answer, AnswerError> {
        self.answer_request(
            AnswerRequest::new(query)
                .with_top_k(top_k)
                .with_deadline(deadline),
        )
        .await
    }

    pub async fn answer_request(&self, request: AnswerRequest) -> Result<Answer, AnswerError> {
        let query_id = Uuid::new_v4();
        let mut tracker = StageTracker::new(query_id);

        let Ok(_permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            tracker.fail();
            warn!(
                target: "grounded::query",
                query_id = %query_id,
                limit = self.settings.max_in_flight,
                "Query rejected: in-flight limit reached"
            );
            return Err(AnswerError::Overloaded {
                limit: self.settings.max_in_flight,
            });
        };

        let result = self.run(query_id, &request, &mut tracker).await;
        if let Err(e) = &result {
            let stage = tracker.fail();
            warn!(
                target: "grounded::query",
                query_id = %query_id,
                stage = %stage,
                kind = ?e.kind(),
                error = %e,
                "Query failed"
            );
        }
        result
    }

    async fn run(
        &self,
        query_id: Uuid,
        request: &AnswerRequest,
        tracker: &mut StageTracker,
    ) -> Result<Answer, AnswerError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AnswerError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        let top_k = request.top_k.unwrap_or(self.settings.default_top_k);
        if top_k == 0 {
            return Err(AnswerError::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }
        let deadline = Deadline::after(request.deadline.unwrap_or(self.settings.default_deadline));

        // Retrieving
        tracker.advance();
        let mut outcome = match self.retriever.retrieve(query, &request.filter, deadline).await {
            Ok(outcome) => outcome,
            Err(RetrievalError::InvalidQuery(reason)) => return Err(AnswerError::InvalidQuery(reason)),
            Err(RetrievalError::Exhausted { .. }) if deadline.is_expired() => {
                return Err(AnswerError::Timeout {
                    stage: QueryStage::Retrieving,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                let signals = match e {
                    RetrievalError::Exhausted { reasons } => reasons,
                    RetrievalError::InvalidQuery(_) => BTreeMap::new(),
                };
                return Err(AnswerError::NoGrounding { reason, signals });
            }
        };
        if outcome.candidates.is_empty() {
            return Err(AnswerError::NoGrounding {
                reason: "no chunk matched the query".to_string(),
                signals: BTreeMap::new(),
            });
        }

        // The context never holds more passages than the extractor numbers
        let context_size = top_k.min(self.citations.max_context_chunks());
        if context_size < top_k {
            info!(
                target: "grounded::query",
                query_id = %query_id,
                top_k,
                context_size,
                "Requested top_k capped by max_context_chunks"
            );
        }

        // Reranking
        tracker.advance();
        let candidates = std::mem::take(&mut outcome.candidates);
        let reranked = self
            .reranker
            .rerank(query, candidates, context_size, deadline)
            .await;

        // Citing: fix the citable context before anything is generated
        tracker.advance();
        let context = self
            .citations
            .build_context(&reranked.candidates, self.retriever.catalog());
        let prompt = build_prompt(query, &context);

        // Generating
        tracker.advance();
        let generation = GenerationRequest {
            query_id,
            prompt,
            max_tokens: self.settings.max_answer_tokens,
            deadline,
            attempt: 0,
        };
        let routed = match self.router.generate(generation).await {
            Ok(routed) => routed,
            Err(RouterError::DeadlineExceeded { .. }) => {
                return Err(AnswerError::Timeout {
                    stage: QueryStage::Generating,
                })
            }
            Err(e) => return Err(AnswerError::ProvidersUnavailable(e)),
        };

        let citations = self.citations.extract(&context, &routed.response.text);

        tracker.advance();
        let latency_ms = tracker.started().elapsed().as_millis() as u64;
        info!(
            target: "grounded::query",
            query_id = %query_id,
            provider = %routed.provider_id,
            latency_ms,
            rerank_skipped = reranked.was_skipped(),
            "Query completed"
        );

        let metadata = AnswerMetadata {
            query_id,
            contributing_signals: outcome.contributing_signals(),
            signals: outcome.signals,
            rerank_skipped: reranked.was_skipped(),
            rerank_skip_reason: reranked.skipped,
            provider: routed.provider_id,
            provider_attempts: routed.attempts,
            usage: routed.response.usage,
            context_chunks: context
                .passages()
                .iter()
                .map(|p| p.chunk.id.clone())
                .collect(),
            latency_ms,
            transitions: tracker.transitions().to_vec(),
        };

        Ok(Answer {
            text: routed.response.text,
            citations,
            metadata,
        })
    }
}
