/// Query encoders: turn query text into the three signal representations
use super::{QueryVector, Signal};
use crate::corpus::{SparseVector, TokenVectors};
use crate::text;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EncodeError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Query encoding failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Query text encoded for each signal. A missing part disables that signal
/// for the query without failing it.
#[derive(Debug, Clone, Default)]
pub struct QueryRepresentation {
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
    pub tokens: Option<TokenVectors>,
}

impl QueryRepresentation {
    /// The part of this representation a given adapter consumes
    pub fn for_signal(&self, signal: Signal) -> Option<QueryVector> {
        match signal {
            Signal::Dense => self.dense.clone().map(QueryVector::Dense),
            Signal::Sparse => self
                .sparse
                .clone()
                .filter(|s| !s.is_empty())
                .map(QueryVector::Sparse),
            Signal::Token => self
                .tokens
                .clone()
                .filter(|t| !t.is_empty())
                .map(QueryVector::Tokens),
        }
    }
}

/// Trait for query encoders
///
/// Encoding models are external black boxes; implementations only adapt them
/// to the three representation shapes.
#[async_trait]
pub trait QueryEncoder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<QueryRepresentation, EncodeError>;

    fn name(&self) -> &str;
}

/// Sparse-only encoder built on the lexical term weights.
///
/// Always available; useful on its own for air-gapped setups where only the
/// sparse index is populated.
#[derive(Debug, Clone, Default)]
pub struct LexicalEncoder;

#[async_trait]
impl QueryEncoder for LexicalEncoder {
    async fn encode(&self, text: &str) -> Result<QueryRepresentation, EncodeError> {
        if text.trim().is_empty() {
            return Err(EncodeError::InvalidInput("Empty query".to_string()));
        }
        Ok(QueryRepresentation {
            dense: None,
            sparse: Some(text::term_weights(text)),
            tokens: None,
        })
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// FastEmbed-backed encoder producing all three representations
///
/// Dense: one sentence embedding. Token: one embedding per query term, in
/// query order. Sparse: lexical term weights.
///
/// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
/// on first use.
pub struct ModelQueryEncoder {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
    token_vectors: bool,
}

impl ModelQueryEncoder {
    /// Create an encoder with the specified model
    pub fn new(model_name: &str, token_vectors: bool) -> Result<Self, EncodeError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            _ => {
                return Err(EncodeError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        tracing::info!(
            "Initializing query encoder: {} ({}D, token vectors: {})",
            model_name,
            dimension,
            token_vectors
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EncodeError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
            token_vectors,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_blocking(
        model: &TextEmbedding,
        text: &str,
        dimension: usize,
        token_vectors: bool,
    ) -> Result<(Vec<f32>, Option<TokenVectors>), EncodeError> {
        let dense = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EncodeError::GenerationError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EncodeError::GenerationError("No embeddings generated".to_string()))?;

        if dense.len() != dimension {
            return Err(EncodeError::DimensionMismatch {
                expected: dimension,
                actual: dense.len(),
            });
        }

        let tokens = if token_vectors {
            let terms = text::tokenize(text);
            if terms.is_empty() {
                None
            } else {
                let vectors = model
                    .embed(terms, None)
                    .map_err(|e| EncodeError::GenerationError(e.to_string()))?;
                Some(TokenVectors::new(vectors))
            }
        } else {
            None
        };

        Ok((dense, tokens))
    }
}

#[async_trait]
impl QueryEncoder for ModelQueryEncoder {
    async fn encode(&self, text: &str) -> Result<QueryRepresentation, EncodeError> {
        if text.trim().is_empty() {
            return Err(EncodeError::InvalidInput("Empty query".to_string()));
        }

        let model = Arc::clone(&self.model);
        let owned = text.to_string();
        let dimension = self.dimension;
        let token_vectors = self.token_vectors;

        // Inference is CPU-bound; keep it off the async workers
        let (dense, tokens) = tokio::task::spawn_blocking(move || {
            Self::embed_blocking(&model, &owned, dimension, token_vectors)
        })
        .await
        .map_err(|e| EncodeError::GenerationError(format!("encoder task failed: {e}")))??;

        Ok(QueryRepresentation {
            dense: Some(dense),
            sparse: Some(text::term_weights(text)),
            tokens,
        })
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lexical_encoder_sparse_only() {
        let repr = LexicalEncoder.encode("hybrid retrieval fusion").await.unwrap();
        assert!(repr.dense.is_none());
        assert!(repr.for_signal(Signal::Sparse).is_some());
        assert!(repr.for_signal(Signal::Token).is_none());
    }

    #[tokio::test]
    async fn test_lexical_encoder_rejects_empty() {
        assert!(LexicalEncoder.encode("   ").await.is_err());
    }

    #[test]
    fn test_empty_parts_disable_signal() {
        let repr = QueryRepresentation {
            dense: Some(vec![1.0]),
            sparse: Some(SparseVector::default()),
            tokens: Some(TokenVectors::default()),
        };
        assert!(repr.for_signal(Signal::Dense).is_some());
        assert!(repr.for_signal(Signal::Sparse).is_none());
        assert!(repr.for_signal(Signal::Token).is_none());
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_model_encoder_all_parts() {
        let encoder = ModelQueryEncoder::new("all-MiniLM-L6-v2", true).unwrap();
        let repr = encoder.encode("circuit breaker backoff").await.unwrap();
        assert_eq!(repr.dense.as_ref().map(Vec::len), Some(384));
        assert_eq!(repr.tokens.as_ref().map(TokenVectors::len), Some(3));
        assert!(repr.sparse.is_some());
    }
}
