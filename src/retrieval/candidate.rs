//! Retrieval candidates and per-signal bookkeeping

use crate::corpus::Chunk;
use crate::index::Signal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Position and raw score of a chunk in one signal's ranked list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRank {
    /// 1-based rank after per-signal deduplication
    pub rank: usize,
    /// Adapter-specific raw score
    pub raw_score: f32,
}

/// Raw per-signal evidence for one chunk; any entry may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalRanks {
    pub dense: Option<SignalRank>,
    pub sparse: Option<SignalRank>,
    pub token: Option<SignalRank>,
}

impl SignalRanks {
    pub fn get(&self, signal: Signal) -> Option<SignalRank> {
        match signal {
            Signal::Dense => self.dense,
            Signal::Sparse => self.sparse,
            Signal::Token => self.token,
        }
    }

    pub fn set(&mut self, signal: Signal, rank: SignalRank) {
        match signal {
            Signal::Dense => self.dense = Some(rank),
            Signal::Sparse => self.sparse = Some(rank),
            Signal::Token => self.token = Some(rank),
        }
    }

    /// Signals in which the chunk appeared
    pub fn matched(&self) -> Vec<Signal> {
        Signal::ALL
            .into_iter()
            .filter(|s| self.get(*s).is_some())
            .collect()
    }
}

/// A chunk competing for a place in the answer context.
///
/// Created per query by the hybrid retriever and discarded with the response.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub chunk: Arc<Chunk>,

    pub ranks: SignalRanks,

    /// Reciprocal-rank fusion score
    pub fused_score: f32,

    /// Second-pass score, populated by the reranker
    pub rerank_score: Option<f32>,

    /// Domain boost added to the rerank score
    pub boost: f32,
}

impl RetrievalCandidate {
    pub fn new(chunk: Arc<Chunk>, ranks: SignalRanks, fused_score: f32) -> Self {
        Self {
            chunk,
            ranks,
            fused_score,
            rerank_score: None,
            boost: 0.0,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    /// Score the candidate is currently ordered by
    pub fn final_score(&self) -> f32 {
        match self.rerank_score {
            Some(score) => score + self.boost,
            None => self.fused_score,
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.chunk.text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.chunk.text[..idx]),
            None => self.chunk.text.clone(),
        }
    }
}

/// What one signal contributed to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalStatus {
    /// The adapter answered; `hits` may be zero
    Contributed { hits: usize },
    /// The adapter failed, timed out, or had no query representation
    Unavailable { reason: String },
}

impl SignalStatus {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SignalStatus::Unavailable { .. })
    }
}

/// Hybrid retrieval result: fused candidates plus per-signal status
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub candidates: Vec<RetrievalCandidate>,
    pub signals: BTreeMap<Signal, SignalStatus>,
}

impl RetrievalOutcome {
    /// Signals that answered with at least one hit
    pub fn contributing_signals(&self) -> Vec<Signal> {
        self.signals
            .iter()
            .filter(|(_, status)| matches!(status, SignalStatus::Contributed { hits } if *hits > 0))
            .map(|(signal, _)| *signal)
            .collect()
    }

    pub fn is_unavailable(&self, signal: Signal) -> bool {
        self.signals
            .get(&signal)
            .map_or(true, SignalStatus::is_unavailable)
    }
}
