//! Char-offset location of exact text inside rendered blocks.
//!
//! Persisted anchors use char offsets, not byte offsets: stored threads are
//! consumed by renderers that index text by character, and byte positions do
//! not survive that round trip. The helpers here do the conversions and are
//! total on any input, including offsets past the end of the text.

use marginalia_core::TextSpan;

/// First case-sensitive occurrence of `needle` in `haystack`, as a char
/// offset span. `None` when absent or when `needle` is empty.
pub fn locate_exact(haystack: &str, needle: &str) -> Option<TextSpan> {
    if needle.is_empty() {
        return None;
    }
    let byte_start = haystack.find(needle)?;
    let start = byte_to_char_index(haystack, byte_start);
    Some(TextSpan {
        start,
        end: start + needle.chars().count(),
    })
}

/// Number of chars strictly before `byte_idx` in `s`. Clamped to the end of
/// the string; a `byte_idx` inside a multi-byte char counts that char.
pub fn byte_to_char_index(s: &str, byte_idx: usize) -> usize {
    let clamped = byte_idx.min(s.len());
    s.char_indices().take_while(|(b, _)| *b < clamped).count()
}

/// Length of `s` in anchor coordinates (chars).
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Substring of `s` between char offsets `start..end` (half-open). Out of
/// range offsets clamp; inverted ranges yield the empty string.
pub fn slice_chars(s: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}
