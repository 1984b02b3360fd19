//! Cross-encoder reranking with domain boosts

use super::{BoostRules, RetrievalCandidate};
use crate::deadline::Deadline;
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranker returned {actual} scores for {expected} passages")]
    ScoreCountMismatch { expected: usize, actual: usize },
}

/// A relevance model scoring (query, passage) pairs
#[async_trait]
pub trait RerankService: Send + Sync {
    /// One score per passage, in input order
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError>;

    fn name(&self) -> &str;
}

/// Cross-encoder reranker on FastEmbed
pub struct CrossEncoderReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderReranker {
    /// Create a new reranker with specified model
    ///
    /// # Arguments
    /// * `model_name` - Model name (e.g., "BAAI/bge-reranker-base")
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let model = match model_name {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}",
                    model_name
                )))
            }
        };

        info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    /// Create reranker with default model
    pub fn with_default_model() -> Result<Self, RerankError> {
        Self::new("BAAI/bge-reranker-base")
    }
}

#[async_trait]
impl RerankService for CrossEncoderReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        if query.is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let passages = passages.to_vec();
        let count = passages.len();

        let results = tokio::task::spawn_blocking(move || {
            let documents: Vec<&str> = passages.iter().map(|s| s.as_str()).collect();
            model.rerank(query.as_str(), documents, false, Some(count))
        })
        .await
        .map_err(|e| RerankError::RerankingError(format!("rerank task failed: {e}")))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        // Results come back sorted by score; restore input order
        let mut scores = vec![f32::NAN; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(RerankError::RerankingError(
                "Reranker did not score every passage".to_string(),
            ));
        }

        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Result of the rerank stage
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<RetrievalCandidate>,

    /// Why reranking was skipped; `None` when it ran
    pub skipped: Option<String>,
}

impl RerankOutcome {
    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// Second-pass ordering of fused candidates.
///
/// Never fails a query: if the service is missing, errors, or runs out of
/// time the fused order is kept and the outcome is flagged as skipped.
pub struct Reranker {
    service: Option<Arc<dyn RerankService>>,
    boosts: BoostRules,
    batch_limit: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(
        service: Option<Arc<dyn RerankService>>,
        boosts: BoostRules,
        batch_limit: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            boosts,
            batch_limit: batch_limit.max(1),
            timeout,
        }
    }

    /// Reorder candidates and keep the best `top_k`
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievalCandidate>,
        top_k: usize,
        deadline: Deadline,
    ) -> RerankOutcome {
        candidates.truncate(self.batch_limit);
        let keep = top_k.min(candidates.len());

        let Some(service) = &self.service else {
            candidates.truncate(keep);
            return RerankOutcome {
                candidates,
                skipped: Some("reranking disabled".to_string()),
            };
        };

        if candidates.is_empty() {
            return RerankOutcome {
                candidates,
                skipped: None,
            };
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let budget = deadline.budget(self.timeout);

        let scored = match tokio::time::timeout(budget, service.score(query, &passages)).await {
            Ok(Ok(scores)) if scores.len() == passages.len() => Ok(scores),
            Ok(Ok(scores)) => Err(RerankError::ScoreCountMismatch {
                expected: passages.len(),
                actual: scores.len(),
            }
            .to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", budget.as_millis())),
        };

        match scored {
            Ok(scores) => {
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.rerank_score = Some(score);
                    candidate.boost = self.boosts.boost_for(&candidate.chunk.text);
                }
                candidates.sort_by(|a, b| {
                    b.final_score()
                        .total_cmp(&a.final_score())
                        .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                        .then_with(|| a.chunk_id().cmp(b.chunk_id()))
                });
                candidates.truncate(keep);

                debug!(
                    "Reranked with {}: top candidate {:?}",
                    service.name(),
                    candidates.first().map(|c| c.chunk_id())
                );
                RerankOutcome {
                    candidates,
                    skipped: None,
                }
            }
            Err(reason) => {
                warn!(
                    reranker = service.name(),
                    reason = %reason,
                    "Reranking skipped, keeping fused order"
                );
                candidates.truncate(keep);
                RerankOutcome {
                    candidates,
                    skipped: Some(reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::retrieval::{BoostRuleConfig, SignalRanks};

    struct LengthScorer;

    #[async_trait]
    impl RerankService for LengthScorer {
        async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
            Ok(passages.iter().map(|p| p.len() as f32 / 100.0).collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl RerankService for FailingScorer {
        async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, RerankError> {
            Err(RerankError::RerankingError("model crashed".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn candidates() -> Vec<RetrievalCandidate> {
        [("a", "short", 0.05), ("b", "a much longer passage", 0.04), ("c", "x = y + 1", 0.03)]
            .into_iter()
            .map(|(id, text, fused)| {
                RetrievalCandidate::new(
                    Arc::new(Chunk::new(id, "doc", text)),
                    SignalRanks::default(),
                    fused,
                )
            })
            .collect()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_truncates() {
        let reranker = Reranker::new(
            Some(Arc::new(LengthScorer)),
            BoostRules::default(),
            50,
            Duration::from_secs(1),
        );
        let outcome = reranker.rerank("q", candidates(), 2, deadline()).await;

        assert!(!outcome.was_skipped());
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_boost_lifts_formula_passage() {
        let boosts = BoostRules::compile(&[BoostRuleConfig {
            boost: 1.0,
            ..BoostRuleConfig::formula()
        }])
        .unwrap();
        let reranker = Reranker::new(Some(Arc::new(LengthScorer)), boosts, 50, Duration::from_secs(1));
        let outcome = reranker.rerank("q", candidates(), 3, deadline()).await;

        assert_eq!(outcome.candidates[0].chunk_id(), "c");
        assert_eq!(outcome.candidates[0].boost, 1.0);
    }

    #[tokio::test]
    async fn test_failure_keeps_fused_order() {
        let reranker = Reranker::new(
            Some(Arc::new(FailingScorer)),
            BoostRules::default(),
            50,
            Duration::from_secs(1),
        );
        let outcome = reranker.rerank("q", candidates(), 2, deadline()).await;

        assert!(outcome.was_skipped());
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(outcome.candidates.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_disabled_reranker_is_flagged() {
        let reranker = Reranker::new(None, BoostRules::default(), 50, Duration::from_secs(1));
        let outcome = reranker.rerank("q", candidates(), 10, deadline()).await;
        assert_eq!(outcome.skipped.as_deref(), Some("reranking disabled"));
        assert_eq!(outcome.candidates.len(), 3);
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_cross_encoder_basic() {
        let reranker = CrossEncoderReranker::with_default_model().unwrap();

        let query = "What is the capital of France?";
        let passages = vec![
            "Paris is the capital of France.".to_string(),
            "London is the capital of England.".to_string(),
            "The weather is nice today.".to_string(),
        ];

        let scores = reranker.score(query, &passages).await.unwrap();

        assert_eq!(scores.len(), 3);
        assert!(scores[0] > scores[2]);
    }
}
