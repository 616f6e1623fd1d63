//! Context assembly: retrieved passages → one prompt-ready text block.

use crate::models::RetrievalResult;

/// Passages shorter than this many characters (after trimming) are dropped.
pub const MIN_CONTEXT_CHARS: usize = 20;

/// Context text used when no passage survives filtering.
pub const NO_CONTEXT: &str = "No relevant context found.";

const PASSAGE_SEPARATOR: &str = "\n\n";

/// Filter and join retrieved passages.
///
/// Each passage is trimmed; passages shorter than [`MIN_CONTEXT_CHARS`] or
/// equal to the question (trimmed, case-insensitive) are discarded.
/// Survivors are joined with a blank line in retrieved order. If nothing
/// survives, returns [`NO_CONTEXT`].
///
/// ```rust
/// use docqa_core::context::{assemble_context, NO_CONTEXT};
/// use docqa_core::models::RetrievalResult;
///
/// assert_eq!(assemble_context("anything?", &RetrievalResult::default()), NO_CONTEXT);
/// ```
pub fn assemble_context(question: &str, retrieved: &RetrievalResult) -> String {
    let question_folded = question.trim().to_lowercase();

    let passages: Vec<&str> = retrieved
        .chunks
        .iter()
        .map(|c| c.content.trim())
        .filter(|text| text.chars().count() >= MIN_CONTEXT_CHARS)
        .filter(|text| text.to_lowercase() != question_folded)
        .collect();

    if passages.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        passages.join(PASSAGE_SEPARATOR)
    }
}
