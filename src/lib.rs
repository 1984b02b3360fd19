//! Grounded - Resilient citation-grounded question answering
//!
//! Answers questions from a pre-indexed corpus: hybrid dense, sparse and
//! token-level retrieval fused with reciprocal rank fusion, cross-encoder
//! reranking, generation through prioritized LLM providers with circuit
//! breakers, and sentence-level citations on every answer.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod deadline;
pub mod error;
pub mod generation;
pub mod index;
pub mod orchestrator;
pub mod retrieval;
pub mod text;

pub use error::{GroundedError, Result};
