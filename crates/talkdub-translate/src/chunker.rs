//! Segment chunking under joint character and count limits.
//!
//! Greedy longest-prefix chunks: a chunk closes when adding the next
//! segment would exceed the character budget or the segment-count budget.
//! A segment that alone exceeds the character budget still forms its own
//! chunk; segments are never split. Order is preserved.

/// One segment entering the translation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInput {
    pub seg_id: String,
    pub text: String,
}

impl ChunkInput {
    #[must_use]
    pub fn new(seg_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            seg_id: seg_id.into(),
            text: text.into(),
        }
    }
}

/// Split `segments` into chunks satisfying both `char_limit` (sum of text
/// lengths) and `seg_limit` (count), except that a single oversized segment
/// occupies a chunk by itself.
#[must_use]
pub fn chunk_segments(
    segments: &[ChunkInput],
    char_limit: usize,
    seg_limit: usize,
) -> Vec<Vec<ChunkInput>> {
    let mut chunks = Vec::new();
    let mut current: Vec<ChunkInput> = Vec::new();
    let mut current_chars = 0usize;

    for seg in segments {
        let text_len = seg.text.chars().count();
        let would_exceed_chars = current_chars + text_len > char_limit;
        let would_exceed_segs = current.len() >= seg_limit;

        if !current.is_empty() && (would_exceed_chars || would_exceed_segs) {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        current_chars += text_len;
        current.push(seg.clone());
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Total source characters across segments, for timeout estimation.
#[must_use]
pub fn estimate_total_chars(segments: &[ChunkInput]) -> usize {
    segments.iter().map(|s| s.text.chars().count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs(texts: &[&str]) -> Vec<ChunkInput> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ChunkInput::new(format!("seg_{i:04}"), *t))
            .collect()
    }

    #[test]
    fn test_chunk_by_char_limit() {
        let segments = inputs(&[&"a".repeat(1000), &"b".repeat(1500), &"c".repeat(800)]);
        let chunks = chunk_segments(&segments, 2000, 100);

        // 1000+1500 > 2000 closes the first chunk; 1500+800 > 2000 closes
        // the second.
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_chunk_by_char_limit_exact() {
        // 1000 + 1000 == limit: fits; the third forces a new chunk.
        let segments = inputs(&[&"a".repeat(1000), &"b".repeat(1000), &"c".repeat(1)]);
        let chunks = chunk_segments(&segments, 2000, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn test_chunk_by_seg_limit() {
        let texts: Vec<String> = (0..50).map(|_| "test".to_string()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let segments = inputs(&refs);

        let chunks = chunk_segments(&segments, 100_000, 20);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[1].len(), 20);
        assert_eq!(chunks[2].len(), 10);
    }

    #[test]
    fn test_oversized_segment_forms_own_chunk() {
        let segments = inputs(&["short", &"x".repeat(5000), "tail"]);
        let chunks = chunk_segments(&segments, 2000, 30);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[1][0].text.len(), 5000);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_segments(&[], 2000, 30).is_empty());
    }

    #[test]
    fn test_estimate_total_chars_counts_chars_not_bytes() {
        let segments = inputs(&["こんにちは", "abc"]);
        assert_eq!(estimate_total_chars(&segments), 8);
    }

    proptest! {
        /// Concatenating the chunks reproduces the input exactly.
        #[test]
        fn prop_concatenation_reproduces_input(
            texts in proptest::collection::vec(".{0,80}", 0..60),
            char_limit in 1usize..200,
            seg_limit in 1usize..20,
        ) {
            let segments: Vec<ChunkInput> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| ChunkInput::new(format!("seg_{i:04}"), t.clone()))
                .collect();

            let chunks = chunk_segments(&segments, char_limit, seg_limit);
            let rejoined: Vec<ChunkInput> = chunks.into_iter().flatten().collect();
            prop_assert_eq!(rejoined, segments);
        }

        /// No chunk exceeds both bounds unless a single segment alone does.
        #[test]
        fn prop_chunks_respect_bounds(
            texts in proptest::collection::vec(".{0,80}", 1..60),
            char_limit in 1usize..200,
            seg_limit in 1usize..20,
        ) {
            let segments: Vec<ChunkInput> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| ChunkInput::new(format!("seg_{i:04}"), t.clone()))
                .collect();

            for chunk in chunk_segments(&segments, char_limit, seg_limit) {
                prop_assert!(!chunk.is_empty());
                prop_assert!(chunk.len() <= seg_limit);
                let chars: usize = chunk.iter().map(|s| s.text.chars().count()).sum();
                if chunk.len() > 1 {
                    prop_assert!(chars <= char_limit);
                }
            }
        }
    }
}
