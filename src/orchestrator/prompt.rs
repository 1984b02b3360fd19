//! Grounded prompt construction

use crate::retrieval::CitationContext;
use std::fmt::Write;

/// Build the generation prompt: numbered passages followed by the question.
///
/// Passage numbers match [`crate::retrieval::Citation::passage`], so `[n]`
/// markers in the answer line up with extracted citations.
pub fn build_prompt(query: &str, context: &CitationContext) -> String {
    let mut prompt = String::from("Passages:\n");

    for passage in context.passages() {
        let source = passage
            .source_uri
            .as_deref()
            .unwrap_or(passage.chunk.document_id.as_str());
        let _ = writeln!(prompt, "[{}] ({})", passage.number, source);
        let _ = writeln!(prompt, "{}\n", passage.chunk.text.trim());
    }

    let _ = write!(
        prompt,
        "Question: {}\n\nAnswer using only the passages above and cite them as [n].",
        query.trim()
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkCatalog};
    use crate::retrieval::{CitationExtractor, RetrievalCandidate, SignalRanks};
    use std::sync::Arc;

    #[test]
    fn test_prompt_numbers_passages() {
        let candidates = vec![
            RetrievalCandidate::new(
                Arc::new(Chunk::new("c1", "guide", "First passage.")),
                SignalRanks::default(),
                0.1,
            ),
            RetrievalCandidate::new(
                Arc::new(Chunk::new("c2", "guide", "Second passage.")),
                SignalRanks::default(),
                0.05,
            ),
        ];
        let context = CitationExtractor::default().build_context(&candidates, &ChunkCatalog::new());
        let prompt = build_prompt(" what? ", &context);

        assert!(prompt.contains("[1] (guide)\nFirst passage."));
        assert!(prompt.contains("[2] (guide)\nSecond passage."));
        assert!(prompt.contains("Question: what?"));
    }
}
