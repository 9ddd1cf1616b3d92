//! Thread-to-block matching: exact containment first, bag-of-words cosine
//! fallback second.
//!
//! The matcher is pure, synchronous, and deterministic: identical inputs
//! always produce identical bindings. Degenerate inputs (no blocks, empty
//! textRef, all stop-words) make threads unmatched, never errors.

use std::collections::BTreeMap;

use marginalia_core::{CommentThread, RenderedBlock, ThreadStore};

use crate::locate::{locate_exact, slice_chars};
use crate::textprep::{bag_of_words, cosine_similarity};

/// Default fallback acceptance threshold.
///
/// Tuned against the reference typo scenario: a textRef with two of four
/// content words misspelled still scores 0.50 against its source paragraph
/// under stop-word-filtered bags, while the unrelated paragraphs around it
/// score 0.0. The default sits between those clusters.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.40;

/// Env var overriding [`DEFAULT_SIMILARITY_THRESHOLD`].
pub const SIMILARITY_THRESHOLD_ENV: &str = "MARGINALIA_SIMILARITY_THRESHOLD";

/// Tunables for the fallback pass.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// A fallback binding is accepted only when the best cosine score
    /// strictly exceeds this. Exact containment ignores it.
    pub similarity_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl MatchConfig {
    /// Default with an optional `MARGINALIA_SIMILARITY_THRESHOLD` override,
    /// clamped to [0, 1]. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var(SIMILARITY_THRESHOLD_ENV) {
            if let Ok(t) = raw.trim().parse::<f64>() {
                if t.is_finite() {
                    cfg.similarity_threshold = t.clamp(0.0, 1.0);
                }
            }
        }
        cfg
    }
}

/// How a thread was bound to its block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingKind {
    /// The block contains the thread's textRef verbatim.
    Exact,
    /// Accepted on bag-of-words cosine similarity, with the score.
    Fuzzy(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub block_index: usize,
    pub kind: BindingKind,
}

/// Result of matching one page's threads against its rendered blocks.
///
/// `bindings` maps thread id to the block it anchors on. Threads that
/// matched nothing are collected in `unmatched`; that is a normal outcome
/// (the content may have been rewritten entirely) and aggregate views still
/// list those threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub bindings: BTreeMap<i64, Binding>,
    pub unmatched: Vec<i64>,
}

impl MatchOutcome {
    /// Block a thread landed on, if any.
    pub fn block_for(&self, thread_id: i64) -> Option<usize> {
        self.bindings.get(&thread_id).map(|b| b.block_index)
    }

    /// Ids of the threads bound to `block_index`, ascending.
    pub fn threads_on(&self, block_index: usize) -> Vec<i64> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.block_index == block_index)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Re-anchor `threads` onto `blocks`.
///
/// Exact containment wins outright: the first block in page order whose
/// `plain_text` contains the textRef. Threads with no exact match fall back
/// to cosine over bags of words; the best-scoring block is accepted only
/// above the threshold, and ties keep the earliest block.
pub fn match_threads(
    threads: &[CommentThread],
    blocks: &[RenderedBlock],
    config: &MatchConfig,
) -> MatchOutcome {
    let mut out = MatchOutcome::default();
    // Block bags are shared across threads; compute them once per render.
    let mut block_bags: Option<Vec<crate::textprep::BagOfWords>> = None;
    for thread in threads {
        match bind_thread(thread, blocks, config, &mut block_bags) {
            Some(binding) => {
                out.bindings.insert(thread.id, binding);
            }
            None => out.unmatched.push(thread.id),
        }
    }
    out
}

/// `match_threads` restricted to the threads recorded for `section`.
/// Threads from other sections never participate in a page's matching.
pub fn match_section_threads(
    section: &str,
    threads: &[CommentThread],
    blocks: &[RenderedBlock],
    config: &MatchConfig,
) -> MatchOutcome {
    let scoped: Vec<CommentThread> = threads
        .iter()
        .filter(|t| t.section == section)
        .cloned()
        .collect();
    match_threads(&scoped, blocks, config)
}

fn bind_thread(
    thread: &CommentThread,
    blocks: &[RenderedBlock],
    config: &MatchConfig,
    block_bags: &mut Option<Vec<crate::textprep::BagOfWords>>,
) -> Option<Binding> {
    if !thread.is_anchorable() {
        return None;
    }

    // Exact pass. The stored offsets only short-circuit the substring scan;
    // the winning block is always the first containing one in page order.
    for block in blocks {
        if block_contains(block, thread) {
            return Some(Binding {
                block_index: block.block_index,
                kind: BindingKind::Exact,
            });
        }
    }

    // Fallback pass.
    let needle = bag_of_words(&thread.text_ref);
    if needle.is_empty() {
        // All stop-words: every block would score 0.0.
        return None;
    }
    let bags = block_bags
        .get_or_insert_with(|| blocks.iter().map(|b| bag_of_words(&b.plain_text)).collect());
    let mut best: Option<(usize, f64)> = None;
    for (block, bag) in blocks.iter().zip(bags.iter()) {
        let score = cosine_similarity(&needle, bag);
        // Strict comparison keeps the earliest block on ties.
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((block.block_index, score));
        }
    }
    match best {
        Some((block_index, score)) if score > config.similarity_threshold => {
            tracing::debug!(thread = thread.id, block = block_index, score, "fuzzy re-anchor");
            Some(Binding {
                block_index,
                kind: BindingKind::Fuzzy(score),
            })
        }
        Some((_, score)) => {
            tracing::debug!(
                thread = thread.id,
                score,
                threshold = config.similarity_threshold,
                "no block above threshold"
            );
            None
        }
        None => None,
    }
}

fn block_contains(block: &RenderedBlock, thread: &CommentThread) -> bool {
    let hinted = slice_chars(&block.plain_text, thread.text_ref_start, thread.text_ref_end);
    if !hinted.is_empty() && hinted == thread.text_ref {
        return true;
    }
    locate_exact(&block.plain_text, &thread.text_ref).is_some()
}

/// Fetch a section's threads, degrading transport failures to an empty list
/// so the page still renders. The failure is logged, not surfaced.
pub async fn threads_or_empty(store: &dyn ThreadStore, section: &str) -> Vec<CommentThread> {
    match store.threads_for_section(section).await {
        Ok(threads) => threads,
        Err(e) => {
            tracing::warn!(section, error = %e, "thread fetch failed; rendering without threads");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::{BlockKind, Error, Result, ThreadDraft};
    use proptest::prelude::*;

    fn block(index: usize, text: &str) -> RenderedBlock {
        RenderedBlock {
            block_index: index,
            plain_text: text.to_string(),
            kind: BlockKind::Paragraph,
            container_path: format!("paragraph {}", index + 1),
        }
    }

    fn thread(id: i64, text_ref: &str) -> CommentThread {
        CommentThread {
            id,
            section: "test.theme.course.section".to_string(),
            text_ref: text_ref.to_string(),
            text_ref_start: 0,
            text_ref_end: text_ref.chars().count(),
            resolved: false,
            instructor_only: false,
            created_by: "author@example.org".to_string(),
            comments: Vec::new(),
        }
    }

    fn typo_page() -> Vec<RenderedBlock> {
        vec![
            block(0, "First irrelevant paragraph."),
            block(
                1,
                "This is the paragraph with the correct spelling of the keyword.",
            ),
            block(2, "Final paragraph with no relation."),
        ]
    }

    #[test]
    fn exact_containment_binds_without_similarity() {
        let blocks = typo_page();
        let t = thread(1, "correct spelling of the keyword");
        let out = match_threads(&[t], &blocks, &MatchConfig::default());
        assert_eq!(
            out.bindings.get(&1),
            Some(&Binding {
                block_index: 1,
                kind: BindingKind::Exact
            })
        );
        assert!(out.unmatched.is_empty());
    }

    #[test]
    fn typo_text_ref_falls_back_to_its_paragraph_only() {
        let blocks = typo_page();
        let t = thread(
            9,
            "This is the paragraf with the correkt spelling of the keyword.",
        );
        let out = match_threads(&[t.clone()], &blocks, &MatchConfig::default());
        let binding = out.bindings.get(&9).copied().expect("thread should bind");
        assert_eq!(binding.block_index, 1);
        match binding.kind {
            BindingKind::Fuzzy(score) => {
                assert!(score > DEFAULT_SIMILARITY_THRESHOLD, "score={score}");
                assert!(score < 1.0);
            }
            BindingKind::Exact => panic!("typo text cannot match exactly"),
        }

        // A stricter threshold rejects the same thread.
        let strict = MatchConfig {
            similarity_threshold: 0.9,
        };
        let out = match_threads(&[t], &blocks, &strict);
        assert!(out.bindings.is_empty());
        assert_eq!(out.unmatched, vec![9]);
    }

    #[test]
    fn duplicate_blocks_bind_to_the_first_in_page_order() {
        let blocks = vec![
            block(0, "One paragraph."),
            block(1, "Repeated text of the page."),
            block(2, "Repeated text of the page."),
        ];
        let t = thread(4, "Repeated text of the page.");
        let out = match_threads(&[t], &blocks, &MatchConfig::default());
        assert_eq!(out.block_for(4), Some(1));
    }

    #[test]
    fn fuzzy_ties_keep_the_earliest_block() {
        let blocks = vec![
            block(0, "Procedural programming follows sequential steps"),
            block(1, "Procedural programming follows sequential steps"),
        ];
        // No exact match (different punctuation), same cosine for both blocks.
        let t = thread(2, "Procedural programming follows sequential steps!!");
        let out = match_threads(&[t], &blocks, &MatchConfig::default());
        assert_eq!(out.block_for(2), Some(0));
    }

    #[test]
    fn exact_match_beats_a_better_fuzzy_candidate_later() {
        // Block 0 contains the textRef verbatim inside longer text; block 1
        // would score higher on cosine. Exact containment still wins.
        let blocks = vec![
            block(
                0,
                "Preamble text. Functional programming uses pure functions. Postscript.",
            ),
            block(1, "Functional programming uses pure functions"),
        ];
        let t = thread(3, "Functional programming uses pure functions");
        let out = match_threads(&[t], &blocks, &MatchConfig::default());
        assert_eq!(
            out.bindings.get(&3),
            Some(&Binding {
                block_index: 0,
                kind: BindingKind::Exact
            })
        );
    }

    #[test]
    fn degenerate_inputs_produce_unmatched_not_errors() {
        let out = match_threads(
            &[thread(1, ""), thread(2, "   "), thread(3, "the and of")],
            &typo_page(),
            &MatchConfig::default(),
        );
        assert!(out.bindings.is_empty());
        assert_eq!(out.unmatched, vec![1, 2, 3]);

        let no_blocks = match_threads(
            &[thread(4, "anything at all")],
            &[],
            &MatchConfig::default(),
        );
        assert_eq!(no_blocks.unmatched, vec![4]);
    }

    #[test]
    fn stored_offsets_do_not_change_the_winning_block() {
        // Offsets point inside block 2, but block 1 also contains the text
        // and comes first in page order.
        let blocks = vec![
            block(0, "Unrelated opener."),
            block(1, "Shared sentence appears here."),
            block(2, "Shared sentence appears here."),
        ];
        let mut t = thread(5, "Shared sentence appears here.");
        t.text_ref_start = 0;
        t.text_ref_end = 29;
        let out = match_threads(&[t], &blocks, &MatchConfig::default());
        assert_eq!(out.block_for(5), Some(1));
    }

    #[test]
    fn section_scoping_excludes_foreign_threads() {
        let blocks = typo_page();
        let mut foreign = thread(7, "First irrelevant paragraph.");
        foreign.section = "other.theme.course.section".to_string();
        let local = thread(8, "First irrelevant paragraph.");
        let out = match_section_threads(
            "test.theme.course.section",
            &[foreign, local],
            &blocks,
            &MatchConfig::default(),
        );
        assert_eq!(out.block_for(8), Some(0));
        assert_eq!(out.block_for(7), None);
        assert!(!out.unmatched.contains(&7));
    }

    #[test]
    fn outcome_lookups_group_threads_by_block() {
        let blocks = typo_page();
        let out = match_threads(
            &[
                thread(1, "First irrelevant paragraph."),
                thread(2, "irrelevant"),
                thread(3, "Final paragraph with no relation."),
            ],
            &blocks,
            &MatchConfig::default(),
        );
        assert_eq!(out.threads_on(0), vec![1, 2]);
        assert_eq!(out.threads_on(2), vec![3]);
        assert!(out.threads_on(1).is_empty());
    }

    #[test]
    fn threshold_is_strictly_exceeded() {
        let blocks = vec![block(0, "alpha beta gamma delta")];
        // Two of four tokens shared: cosine is exactly 0.5.
        let t = thread(6, "alpha beta epsilon zeta");
        let at_boundary = MatchConfig {
            similarity_threshold: 0.5,
        };
        let out = match_threads(&[t.clone()], &blocks, &at_boundary);
        assert_eq!(out.unmatched, vec![6]);

        let below = MatchConfig {
            similarity_threshold: 0.49,
        };
        let out = match_threads(&[t], &blocks, &below);
        assert_eq!(out.block_for(6), Some(0));
    }

    #[test]
    fn env_override_clamps_threshold() {
        let _lock = crate::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // Run the cases in one body so they cannot interleave.
        std::env::set_var(SIMILARITY_THRESHOLD_ENV, "2.5");
        assert_eq!(MatchConfig::from_env().similarity_threshold, 1.0);
        std::env::set_var(SIMILARITY_THRESHOLD_ENV, "0.75");
        assert_eq!(MatchConfig::from_env().similarity_threshold, 0.75);
        std::env::set_var(SIMILARITY_THRESHOLD_ENV, "not a number");
        assert_eq!(
            MatchConfig::from_env().similarity_threshold,
            DEFAULT_SIMILARITY_THRESHOLD
        );
        std::env::remove_var(SIMILARITY_THRESHOLD_ENV);
        assert_eq!(
            MatchConfig::from_env().similarity_threshold,
            DEFAULT_SIMILARITY_THRESHOLD
        );
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl ThreadStore for FailingStore {
        async fn threads_for_section(&self, _section: &str) -> Result<Vec<CommentThread>> {
            Err(Error::Fetch("connection refused".to_string()))
        }

        async fn create_thread(&self, _draft: &ThreadDraft) -> Result<CommentThread> {
            Err(Error::Fetch("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_empty_thread_list() {
        let threads = threads_or_empty(&FailingStore, "test.theme.course.section").await;
        assert!(threads.is_empty());
    }

    proptest! {
        #[test]
        fn every_thread_lands_in_exactly_one_bucket(
            refs in prop::collection::vec(any::<String>(), 0..8),
            texts in prop::collection::vec(any::<String>(), 0..8),
        ) {
            let threads: Vec<CommentThread> = refs
                .iter()
                .enumerate()
                .map(|(i, r)| thread(i as i64, r))
                .collect();
            let blocks: Vec<RenderedBlock> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| block(i, t))
                .collect();
            let out = match_threads(&threads, &blocks, &MatchConfig::default());
            let mut seen: Vec<i64> = out
                .bindings
                .keys()
                .copied()
                .chain(out.unmatched.iter().copied())
                .collect();
            seen.sort_unstable();
            let expected: Vec<i64> = (0..threads.len() as i64).collect();
            prop_assert_eq!(seen, expected);
            for b in out.bindings.values() {
                prop_assert!(b.block_index < blocks.len());
            }
        }
    }
}
