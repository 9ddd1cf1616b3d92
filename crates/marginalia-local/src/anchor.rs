//! Anchor construction for newly created threads.

use marginalia_core::{Anchor, Error, RenderedBlock, Result, TextSpan};

use crate::locate::{char_len, locate_exact, slice_chars};

/// Build the persistable anchor for a selection inside `block`.
///
/// `selection_start..selection_end` are char offsets into `block.plain_text`,
/// half-open. Empty and out-of-range selections are rejected with
/// `Error::InvalidSelection`; that is the only failure mode.
///
/// The stored offsets are normalized to the first occurrence of the selected
/// text, so a freshly built anchor always relocates exactly via
/// `locate_exact` against the same block. For selections whose text has no
/// earlier duplicate, that is the selection's own span.
pub fn build_anchor(
    block: &RenderedBlock,
    selection_start: usize,
    selection_end: usize,
) -> Result<Anchor> {
    if selection_start >= selection_end {
        return Err(Error::InvalidSelection(format!(
            "empty selection {selection_start}..{selection_end}"
        )));
    }
    let len = char_len(&block.plain_text);
    if selection_end > len {
        return Err(Error::InvalidSelection(format!(
            "selection {selection_start}..{selection_end} exceeds block of {len} chars"
        )));
    }

    let text_ref = slice_chars(&block.plain_text, selection_start, selection_end);
    // The slice is present in the block, so the locator cannot miss; the
    // fallback span keeps this total anyway.
    let span = locate_exact(&block.plain_text, &text_ref).unwrap_or(TextSpan {
        start: selection_start,
        end: selection_end,
    });

    Ok(Anchor {
        text_ref,
        text_ref_start: span.start,
        text_ref_end: span.end,
    })
}
