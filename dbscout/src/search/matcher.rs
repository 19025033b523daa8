use std::ops::Range;

use crate::errors::{SearchError, SearchResult};

/// Locale-independent case folding used for all comparisons.
///
/// This is Unicode lowercasing (`char::to_lowercase`), which agrees with full
/// case folding for everything except a handful of special cases such as
/// `ß` vs `ss`.
pub fn casefold(text: &str) -> String {
    if text.is_ascii() {
        text.to_ascii_lowercase()
    } else {
        text.chars().flat_map(char::to_lowercase).collect()
    }
}

/// Folded copy of a text together with a map from folded byte offsets back to
/// offsets in the original text.
struct FoldedText {
    folded: String,
    /// `origin[i]` is the byte offset in the original text of the char that
    /// produced folded byte `i`
    origin: Vec<usize>,
}

impl FoldedText {
    fn new(text: &str) -> Self {
        let mut folded = String::with_capacity(text.len());
        let mut origin = Vec::with_capacity(text.len());
        for (offset, ch) in text.char_indices() {
            for lower in ch.to_lowercase() {
                let before = folded.len();
                folded.push(lower);
                origin.extend(std::iter::repeat(offset).take(folded.len() - before));
            }
        }
        Self { folded, origin }
    }

    /// Maps a folded byte range back to a range of whole chars in `text`
    fn original_range(&self, text: &str, folded: Range<usize>) -> Range<usize> {
        let start = self.origin[folded.start];
        let last = self.origin[folded.end - 1];
        let last_len = text[last..].chars().next().map_or(0, char::len_utf8);
        start..last + last_len
    }
}

/// Case-insensitive substring matcher for a single search term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMatcher {
    term: String,
    folded: String,
}

impl TermMatcher {
    /// Creates a matcher for `term`, ignoring surrounding whitespace.
    ///
    /// Returns [`SearchError::EmptyQuery`] if nothing is left to search for.
    pub fn new(term: &str) -> SearchResult<Self> {
        let term = term.trim();
        if term.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        Ok(Self {
            term: term.to_string(),
            folded: casefold(term),
        })
    }

    /// The trimmed term as given
    pub fn term(&self) -> &str {
        &self.term
    }

    /// The normalized form used for comparisons and cache keys
    pub fn folded(&self) -> &str {
        &self.folded
    }

    /// Finds the first occurrence of the term, returning its byte range in `text`
    pub fn find(&self, text: &str) -> Option<Range<usize>> {
        if text.is_ascii() {
            // ASCII lowercasing preserves byte offsets
            let lowered = text.to_ascii_lowercase();
            return lowered
                .find(&self.folded)
                .map(|start| start..start + self.folded.len());
        }

        let folded = FoldedText::new(text);
        let start = folded.folded.find(&self.folded)?;
        Some(folded.original_range(text, start..start + self.folded.len()))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find(text).is_some()
    }
}
