//! Weighted Reciprocal Rank Fusion over the dense, sparse and token signals

use super::deduplication::deduplicate_hits;
use super::{SignalRank, SignalRanks};
use crate::corpus::ChunkId;
use crate::index::{ScoredHit, Signal};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be non-negative and at least one positive")]
    InvalidWeights,

    #[error("Invalid RRF constant: {0}")]
    InvalidRrfK(f32),
}

/// Per-signal fusion weights; the sum need not be 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub dense: f32,
    pub sparse: f32,
    pub token: f32,
}

impl SignalWeights {
    pub fn get(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Dense => self.dense,
            Signal::Sparse => self.sparse,
            Signal::Token => self.token,
        }
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            dense: 1.0,
            sparse: 1.0,
            token: 1.0,
        }
    }
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    pub weights: SignalWeights,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, weights: SignalWeights) -> Result<Self, FusionError> {
        let all = [weights.dense, weights.sparse, weights.token];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) || all.iter().all(|w| *w == 0.0) {
            return Err(FusionError::InvalidWeights);
        }
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidRrfK(rrf_k));
        }

        Ok(Self { rrf_k, weights })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            weights: SignalWeights::default(),
        }
    }
}

/// One fused chunk with the evidence that produced its score
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEntry {
    pub chunk_id: ChunkId,
    pub fused_score: f32,
    pub ranks: SignalRanks,
}

/// Apply Reciprocal Rank Fusion to the ranked lists of up to three signals
///
/// RRF formula: score(id) = sum over signals containing id of: weight / (k + rank),
/// with 1-based ranks. A chunk absent from a signal gets nothing from it but is
/// not excluded. Each list is deduplicated by chunk id first.
///
/// # Returns
/// Fused entries sorted by score descending, ties broken by chunk id ascending
pub fn reciprocal_rank_fusion(
    lists: Vec<(Signal, Vec<ScoredHit>)>,
    config: &FusionConfig,
) -> Vec<FusedEntry> {
    let mut lists = lists;
    // Fixed accumulation order keeps float sums identical across runs
    lists.sort_by_key(|(signal, _)| *signal);

    let mut fused: AHashMap<ChunkId, FusedEntry> = AHashMap::new();

    for (signal, hits) in lists {
        let weight = config.weights.get(signal);
        for (idx, hit) in deduplicate_hits(hits).into_iter().enumerate() {
            let rank = idx + 1;
            let rrf_score = weight / (config.rrf_k + rank as f32);

            let entry = fused
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| FusedEntry {
                    chunk_id: hit.chunk_id.clone(),
                    fused_score: 0.0,
                    ranks: SignalRanks::default(),
                });
            entry.fused_score += rrf_score;
            entry.ranks.set(
                signal,
                SignalRank {
                    rank,
                    raw_score: hit.score,
                },
            );
        }
    }

    let mut results: Vec<FusedEntry> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    results
}
