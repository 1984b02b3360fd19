//! Sentence-level citation extraction
//!
//! Every answer segment is matched against the sentences of the chunks that
//! were actually placed in the generation context. A segment either cites
//! one (chunk, sentence span) pair from that context or is explicitly marked
//! unsupported; nothing outside the context can ever be cited.

use super::RetrievalCandidate;
use crate::corpus::{Chunk, ChunkCatalog, ChunkId, DocumentId, SentenceSpan};
use crate::text;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One chunk placed in the generation context, numbered from 1
#[derive(Debug, Clone)]
pub struct Passage {
    pub number: usize,
    pub chunk: Arc<Chunk>,
    pub source_uri: Option<String>,
}

/// The chunks an answer may cite, in prompt order
#[derive(Debug, Clone, Default)]
pub struct CitationContext {
    passages: Vec<Passage>,
}

impl CitationContext {
    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.passages.iter().any(|p| p.chunk.id == chunk_id)
    }
}

/// Link from an answer segment to a source sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub source_uri: Option<String>,
    /// Context passage number the chunk was given under
    pub passage: usize,
    pub span: SentenceSpan,
    pub quote: String,
    pub confidence: f32,
}

/// An answer segment and its citation, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCitation {
    pub segment: String,
    /// Byte span of the segment inside the answer text
    pub span: SentenceSpan,
    /// `None` marks the segment as unsupported
    pub citation: Option<Citation>,
}

impl SegmentCitation {
    pub fn is_supported(&self) -> bool {
        self.citation.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CitationExtractor {
    min_confidence: f32,
    max_context_chunks: usize,
}

impl Default for CitationExtractor {
    fn default() -> Self {
        Self::new(0.2, 8)
    }
}

impl CitationExtractor {
    pub fn new(min_confidence: f32, max_context_chunks: usize) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
            max_context_chunks: max_context_chunks.max(1),
        }
    }

    /// Upper bound on the passages placed in one generation context
    pub fn max_context_chunks(&self) -> usize {
        self.max_context_chunks
    }

    /// Number the final candidates and resolve their source locations
    pub fn build_context(
        &self,
        candidates: &[RetrievalCandidate],
        catalog: &ChunkCatalog,
    ) -> CitationContext {
        let passages = candidates
            .iter()
            .take(self.max_context_chunks)
            .enumerate()
            .map(|(idx, candidate)| Passage {
                number: idx + 1,
                chunk: Arc::clone(&candidate.chunk),
                source_uri: catalog.source_uri(&candidate.chunk),
            })
            .collect();

        CitationContext { passages }
    }

    /// Align each answer sentence with its best-supporting context sentence
    pub fn extract(&self, context: &CitationContext, answer: &str) -> Vec<SegmentCitation> {
        text::sentence_spans(answer)
            .into_iter()
            .filter_map(|span| {
                let segment = answer.get(span.start..span.end)?;
                Some(SegmentCitation {
                    segment: segment.to_string(),
                    span,
                    citation: self.best_support(context, segment),
                })
            })
            .collect()
    }

    fn best_support(&self, context: &CitationContext, segment: &str) -> Option<Citation> {
        let mut best: Option<(f32, &Passage, SentenceSpan, &str)> = None;

        for passage in context.passages() {
            for span in &passage.chunk.sentences {
                let Some(sentence) = passage.chunk.sentence_text(*span) else {
                    continue;
                };
                let score = text::lexical_similarity(segment, sentence);
                // Strict comparison keeps the earliest passage and sentence on ties
                if best.map_or(true, |(top, ..)| score > top) {
                    best = Some((score, passage, *span, sentence));
                }
            }
        }

        let (confidence, passage, span, quote) = best?;
        if confidence <= 0.0 || confidence < self.min_confidence {
            return None;
        }

        Some(Citation {
            chunk_id: passage.chunk.id.clone(),
            document_id: passage.chunk.document_id.clone(),
            source_uri: passage.source_uri.clone(),
            passage: passage.number,
            span,
            quote: quote.to_string(),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SignalRanks;

    fn context(chunks: &[(&str, &str)]) -> CitationContext {
        let catalog = ChunkCatalog::new();
        let candidates: Vec<RetrievalCandidate> = chunks
            .iter()
            .map(|(id, body)| {
                RetrievalCandidate::new(
                    Arc::new(Chunk::new(*id, "doc", *body)),
                    SignalRanks::default(),
                    0.0,
                )
            })
            .collect();
        CitationExtractor::default().build_context(&candidates, &catalog)
    }

    #[test]
    fn test_segments_cite_best_sentence() {
        let ctx = context(&[
            ("c1", "Circuit breakers open after repeated failures. They close after a successful probe."),
            ("c2", "Fusion uses reciprocal ranks."),
        ]);
        let answer = "A breaker closes after a successful probe. Fusion combines reciprocal ranks.";
        let segments = CitationExtractor::default().extract(&ctx, answer);

        assert_eq!(segments.len(), 2);

        let first = segments[0].citation.as_ref().unwrap();
        assert_eq!(first.chunk_id, "c1");
        assert_eq!(first.quote, "They close after a successful probe.");
        assert_eq!(first.passage, 1);

        let second = segments[1].citation.as_ref().unwrap();
        assert_eq!(second.chunk_id, "c2");
        assert_eq!(second.passage, 2);
    }

    #[test]
    fn test_unsupported_segment_is_marked() {
        let ctx = context(&[("c1", "Sparse retrieval matches exact terms.")]);
        let segments =
            CitationExtractor::default().extract(&ctx, "The moon orbits quietly tonight.");

        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_supported());
    }

    #[test]
    fn test_citations_stay_inside_context() {
        let ctx = context(&[("c1", "Alpha beta gamma."), ("c2", "Delta epsilon.")]);
        let segments =
            CitationExtractor::default().extract(&ctx, "Alpha beta. Delta epsilon zeta. Nothing.");

        for segment in &segments {
            if let Some(citation) = &segment.citation {
                assert!(ctx.contains(&citation.chunk_id));
                let chunk = &ctx
                    .passages()
                    .iter()
                    .find(|p| p.chunk.id == citation.chunk_id)
                    .unwrap()
                    .chunk;
                assert!(chunk.sentences.contains(&citation.span));
            }
        }
    }

    #[test]
    fn test_empty_context_cites_nothing() {
        let segments = CitationExtractor::default().extract(&CitationContext::default(), "Anything.");
        assert_eq!(segments.len(), 1);
        assert!(segments[0].citation.is_none());
    }

    #[test]
    fn test_context_respects_max_chunks() {
        let candidates: Vec<RetrievalCandidate> = (0..5)
            .map(|i| {
                RetrievalCandidate::new(
                    Arc::new(Chunk::new(format!("c{i}"), "doc", "Text.")),
                    SignalRanks::default(),
                    0.0,
                )
            })
            .collect();
        let ctx = CitationExtractor::new(0.2, 3).build_context(&candidates, &ChunkCatalog::new());
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.passages()[2].number, 3);
    }
}
