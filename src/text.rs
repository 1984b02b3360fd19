//! Lexical helpers shared by the sparse encoder, sentence segmentation and
//! citation scoring.

use crate::corpus::{SentenceSpan, SparseVector};
use ahash::AHashMap;

/// Tokenize text into lowercase alphanumeric terms.
///
/// Single-character fragments are dropped; they carry almost no lexical
/// signal and inflate the sparse maps.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.to_lowercase())
        .collect()
}

/// Build an L2-normalized term-weight map for `text`.
///
/// Weight is a sublinear term frequency times a length-based idf
/// approximation, so that long content words outweigh short function words.
pub fn term_weights(text: &str) -> SparseVector {
    let mut tf: AHashMap<String, f32> = AHashMap::new();
    for term in tokenize(text) {
        *tf.entry(term).or_default() += 1.0;
    }

    let mut weights: AHashMap<String, f32> = tf
        .into_iter()
        .map(|(term, count)| {
            let idf = 1.0 + (term.chars().count() as f32).ln();
            let weight = (1.0 + count.ln()) * idf;
            (term, weight)
        })
        .collect();

    let norm: f32 = weights.values().map(|w| w * w).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for w in weights.values_mut() {
            *w /= norm;
        }
    }

    SparseVector::from_map(weights)
}

/// Split `text` into sentence spans (byte offsets, end exclusive).
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or end of text,
/// or at a blank line. Leading and trailing whitespace is excluded from the
/// span; empty sentences are skipped.
pub fn sentence_spans(text: &str) -> Vec<SentenceSpan> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        let terminal = matches!(c, '.' | '!' | '?') && next.map_or(true, char::is_whitespace);
        let paragraph = c == '\n' && next == Some('\n');
        if terminal || paragraph {
            let end = idx + c.len_utf8();
            push_trimmed(text, start, end, &mut spans);
            start = end;
        }
    }
    push_trimmed(text, start, text.len(), &mut spans);

    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<SentenceSpan>) {
    let Some(slice) = text.get(start..end) else {
        return;
    };
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading + trailing >= slice.len() {
        return;
    }
    spans.push(SentenceSpan::new(start + leading, end - trailing));
}

/// Cosine similarity between the term-frequency vectors of two texts.
///
/// Returns a value in `[0, 1]`; 0 when either side has no terms.
pub fn lexical_similarity(a: &str, b: &str) -> f32 {
    let a = term_counts(a);
    let b = term_counts(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a: f32 = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|x| x * x).sum::<f32>().sqrt();

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

fn term_counts(text: &str) -> AHashMap<String, f32> {
    let mut counts = AHashMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0.0) += 1.0;
    }
    counts
}
