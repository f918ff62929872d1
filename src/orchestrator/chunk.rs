//! Whitespace chunking for ingest and token accounting for recall budgets.

/// Number of whitespace tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// First `max_tokens` whitespace tokens of `text`, re-joined.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clamp to at most `max_bytes` without splitting a UTF-8 scalar.
pub fn clamp_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Split content into overlapping `target_tokens`-sized windows. The step
/// is `target_tokens - overlap_tokens`; the last window keeps every
/// remaining token. Callers validate `overlap_tokens < target_tokens`.
pub fn chunk_text(content: &str, target_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let step = target_tokens - overlap_tokens;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + target_tokens).min(tokens.len());
        if end == tokens.len() {
            chunks.push(tokens[start..].join(" "));
            break;
        }
        chunks.push(tokens[start..end].join(" "));
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_windows_with_full_tail() {
        assert_eq!(chunk_text("a b c d e", 3, 1), vec!["a b c", "c d e"]);
        assert_eq!(chunk_text("a b c d e", 2, 0), vec!["a b", "c d", "e"]);
    }

    #[test]
    fn short_content_is_one_chunk() {
        assert_eq!(chunk_text("a b", 10, 2), vec!["a b"]);
    }

    #[test]
    fn empty_content_has_no_chunks() {
        assert!(chunk_text("", 4, 1).is_empty());
        assert!(chunk_text("   \n\t ", 4, 1).is_empty());
    }

    #[test]
    fn tail_keeps_all_remaining_tokens() {
        // Window of 4 starting at 3 would hold 3 tokens; the tail rule
        // extends the final chunk instead of emitting a short one.
        assert_eq!(chunk_text("a b c d e f", 4, 1), vec!["a b c d", "d e f"]);
    }

    #[test]
    fn token_counting_and_truncation() {
        assert_eq!(count_tokens("one two  three\nfour"), 4);
        assert_eq!(truncate_tokens("one two three", 2), "one two");
        assert_eq!(truncate_tokens("one", 5), "one");
        assert_eq!(truncate_tokens("one two", 0), "");
    }

    #[test]
    fn byte_clamp_respects_char_boundaries() {
        assert_eq!(clamp_bytes("abcdef", 3), "abc");
        assert_eq!(clamp_bytes("abc", 10), "abc");
        // 'ü' is two bytes; clamping mid-scalar backs off.
        assert_eq!(clamp_bytes("aü", 2), "a");
    }
}
