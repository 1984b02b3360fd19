//! Scripted collaborators shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use grounded::corpus::{Chunk, ChunkCatalog, DocumentRecord, Ingestor, TokenVectors};
use grounded::generation::{
    GenerationProvider, GenerationRequest, GenerationResponse, ProviderError, TokenUsage,
};
use grounded::index::{
    AdapterError, EncodeError, IndexAdapter, QueryEncoder, QueryRepresentation, QueryVector,
    ScoredHit, SearchFilter, Signal,
};
use grounded::retrieval::{RerankError, RerankService};
use grounded::text;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Encoder producing every representation, so each adapter gets queried
pub struct FullEncoder;

#[async_trait]
impl QueryEncoder for FullEncoder {
    async fn encode(&self, text: &str) -> Result<QueryRepresentation, EncodeError> {
        Ok(QueryRepresentation {
            dense: Some(vec![1.0, 0.0]),
            sparse: Some(text::term_weights(text)),
            tokens: Some(TokenVectors::new(vec![vec![1.0, 0.0]])),
        })
    }

    fn name(&self) -> &str {
        "full"
    }
}

enum Script {
    Hits(Vec<ScoredHit>),
    Fail(String),
}

/// Adapter that answers every search from a fixed script
pub struct ScriptedAdapter {
    signal: Signal,
    script: Script,
    delay: Option<Duration>,
    searches: AtomicUsize,
}

impl ScriptedAdapter {
    fn build(signal: Signal, script: Script, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            signal,
            script,
            delay,
            searches: AtomicUsize::new(0),
        })
    }

    fn ranked(ids: &[&str]) -> Script {
        let count = ids.len() as f32;
        Script::Hits(
            ids.iter()
                .enumerate()
                .map(|(i, id)| ScoredHit::new(*id, count - i as f32))
                .collect(),
        )
    }

    /// Hits in the given (already ranked) order
    pub fn hits(signal: Signal, ids: &[&str]) -> Arc<Self> {
        Self::build(signal, Self::ranked(ids), None)
    }

    pub fn failing(signal: Signal, reason: &str) -> Arc<Self> {
        Self::build(signal, Script::Fail(reason.to_string()), None)
    }

    /// Hits that only arrive after `delay`
    pub fn slow(signal: Signal, ids: &[&str], delay: Duration) -> Arc<Self> {
        Self::build(signal, Self::ranked(ids), Some(delay))
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexAdapter for ScriptedAdapter {
    fn signal(&self) -> Signal {
        self.signal
    }

    async fn search(
        &self,
        _query: &QueryVector,
        top_k: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<ScoredHit>, AdapterError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Hits(hits) => Ok(hits.iter().take(top_k).cloned().collect()),
            Script::Fail(reason) => Err(AdapterError::unavailable(self.signal, reason.clone())),
        }
    }

    async fn upsert(&self, _chunk: &Chunk) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn delete(&self, _chunk_id: &str) -> Result<bool, AdapterError> {
        Ok(false)
    }

    fn len(&self) -> usize {
        match &self.script {
            Script::Hits(hits) => hits.len(),
            Script::Fail(_) => 0,
        }
    }
}

/// Provider whose health can be flipped at runtime
pub struct ScriptedProvider {
    id: String,
    reply: String,
    failing: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn healthy(id: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        let provider = Self::healthy(id, "");
        provider.set_failing(true);
        provider
    }

    /// Healthy provider that takes `delay` to answer
    pub fn slow(id: &str, reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(GenerationResponse {
            text: self.reply.clone(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
        })
    }
}

/// Reranker that either fails or prefers longer passages
pub struct ScriptedReranker {
    fail: bool,
}

impl ScriptedReranker {
    pub fn by_length() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl RerankService for ScriptedReranker {
    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        if self.fail {
            return Err(RerankError::RerankingError("model crashed".to_string()));
        }
        Ok(passages.iter().map(|p| p.len() as f32 / 100.0).collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Ingest one document with the given `(chunk id, text)` pairs into `catalog`
pub async fn ingest(catalog: &Arc<ChunkCatalog>, document_id: &str, chunks: &[(&str, &str)]) {
    let ingestor = Ingestor::new(Arc::clone(catalog), Vec::new());
    let record = DocumentRecord {
        id: document_id.to_string(),
        source_uri: format!("file:///docs/{}.md", document_id),
        ingested_at: None,
        chunks: chunks
            .iter()
            .map(|(id, body)| Chunk::new(*id, document_id, *body).with_sparse(text::term_weights(body)))
            .collect(),
    };
    ingestor.ingest(record).await.unwrap();
}
