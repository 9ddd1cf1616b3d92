//! Deterministic text preparation for matching: tokenization, bags of words,
//! and cosine similarity.
//!
//! Everything here is pure and total. Matching quality depends on these
//! functions behaving identically on every call, so there is no configuration
//! and no locale sensitivity. Output is matching-only, never display text.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Fixed English stop-word list applied during tokenization.
///
/// Articles, copulas, pronouns, prepositions, and conjunctions: words that
/// carry no anchoring signal. The list is frozen; changing it re-scores every
/// stored thread against every page.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "below", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "down", "during", "each", "few", "for", "from", "further", "had", "has",
    "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not", "of", "off", "on",
    "once", "only", "or", "other", "our", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Lowercased alphanumeric runs with stop-words removed, in text order.
///
/// Total on any input: empty and whitespace-only strings yield an empty vec.
/// Idempotent: re-tokenizing the space-joined output returns the same tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            // Lowercasing can expand one char into several (and can produce
            // combining marks that are not themselves alphanumeric); keep
            // only alphanumeric output so tokens survive re-tokenization.
            for lc in ch.to_lowercase() {
                if lc.is_alphanumeric() {
                    cur.push(lc);
                }
            }
        } else if !cur.is_empty() {
            push_token(&mut tokens, std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        push_token(&mut tokens, cur);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, tok: String) {
    if !tok.is_empty() && !stop_words().contains(tok.as_str()) {
        tokens.push(tok);
    }
}

/// Token occurrence counts for one piece of text.
pub type BagOfWords = HashMap<String, u32>;

/// Count occurrences over `tokenize` output. Empty in, empty out.
pub fn vectorize(tokens: &[String]) -> BagOfWords {
    let mut bow = BagOfWords::with_capacity(tokens.len());
    for tok in tokens {
        *bow.entry(tok.clone()).or_insert(0) += 1;
    }
    bow
}

/// Tokenize and count in one step.
pub fn bag_of_words(text: &str) -> BagOfWords {
    vectorize(&tokenize(text))
}

/// Cosine similarity between two bags, in [0, 1]. Symmetric.
///
/// Returns 0.0 when either bag is empty rather than dividing by a zero norm,
/// and never NaN. A non-empty bag scores exactly 1.0 against itself.
pub fn cosine_similarity(a: &BagOfWords, b: &BagOfWords) -> f64 {
    let norm_sq = |bow: &BagOfWords| -> f64 {
        bow.values().map(|&c| f64::from(c) * f64::from(c)).sum()
    };
    let na = norm_sq(a);
    let nb = norm_sq(b);
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut dot = 0.0f64;
    for (tok, &ca) in small {
        if let Some(&cb) = large.get(tok) {
            dot += f64::from(ca) * f64::from(cb);
        }
    }
    (dot / (na * nb).sqrt()).clamp(0.0, 1.0)
}
