//! Retrieval pipeline: fan-out, fusion, reranking and citation
//!
//! This module handles:
//! - Parallel search across the dense, sparse and token adapters
//! - Weighted Reciprocal Rank Fusion of the per-signal lists
//! - Cross-encoder reranking with domain boosts
//! - Sentence-level citation of generated answers

mod boost;
mod candidate;
mod citation;
mod deduplication;
mod fusion;
mod hybrid;
mod reranker;

pub use boost::{BoostRuleConfig, BoostRules, FORMULA_PATTERN};
pub use candidate::{RetrievalCandidate, RetrievalOutcome, SignalRank, SignalRanks, SignalStatus};
pub use citation::{Citation, CitationContext, CitationExtractor, Passage, SegmentCitation};
pub use deduplication::deduplicate_hits;
pub use fusion::{reciprocal_rank_fusion, FusedEntry, FusionConfig, FusionError, SignalWeights};
pub use hybrid::{HybridRetriever, RetrievalError, RetrievalSettings};
pub use reranker::{CrossEncoderReranker, RerankError, RerankOutcome, RerankService, Reranker};
