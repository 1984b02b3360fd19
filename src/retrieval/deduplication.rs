//! Per-signal deduplication by chunk ID

use crate::index::ScoredHit;
use std::collections::HashSet;

/// Deduplicate hits by chunk_id, keeping the first (best-ranked) instance
///
/// Overlapping windows of the same document can surface one chunk id more
/// than once in a signal's list. Input must already be in rank order.
///
/// # Returns
/// Deduplicated hits, maintaining rank order
pub fn deduplicate_hits(hits: Vec<ScoredHit>) -> Vec<ScoredHit> {
    let mut seen: HashSet<String> = HashSet::new();

    hits.into_iter()
        .filter(|hit| seen.insert(hit.chunk_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplication() {
        let hits = vec![
            ScoredHit::new("c1", 0.9),
            ScoredHit::new("c2", 0.8),
            ScoredHit::new("c1", 0.7), // Duplicate
        ];

        let deduped = deduplicate_hits(hits);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].chunk_id, "c1");
        assert_eq!(deduped[0].score, 0.9); // Keeps first (best rank)
        assert_eq!(deduped[1].chunk_id, "c2");
    }
}
