//! Search result types handed to the presentation layer.
//!
//! A search yields an ordered list of [`Match`]es plus a [`SearchSummary`].
//! Matches are grouped by file in indexing order and sorted by line number
//! within a file, so two runs over the same files produce identical output.
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::index::FileFormat;

/// A record confirmed to contain the search term
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    /// File the record came from
    pub path: PathBuf,
    /// 1-based line where the record starts
    pub line_number: usize,
    /// The matched record text (or the matched field, see `matched_field`)
    pub matched_text: String,
    /// Byte offset of the highlight within `matched_text`
    pub start: usize,
    /// End byte offset (exclusive) of the highlight within `matched_text`
    pub end: usize,
    pub format: FileFormat,
    /// Header label of the delimited field that contains the term, if known
    pub matched_field: Option<String>,
}

impl Match {
    pub fn highlight(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The highlighted slice of `matched_text`
    pub fn highlighted(&self) -> &str {
        &self.matched_text[self.highlight()]
    }
}

/// A file that was left out of a search, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Reported when every indexed file failed to scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub failed_files: usize,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} indexed files failed to scan", self.failed_files)
    }
}

/// Statistics for one call to `search`
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchSummary {
    /// Files opened and read (fully or until cancelled)
    pub files_scanned: usize,
    /// Files that could not be stat'ed or read
    pub files_skipped: usize,
    /// Malformed records or statements that were skipped
    pub records_skipped: usize,
    pub elapsed: Duration,
    /// True iff the result cap stopped the scan before all files were read
    pub truncated: bool,
    /// Results were served from the cache without scanning
    pub cache_hit: bool,
    /// No files matched the extension allowlist under the root
    pub empty_index: bool,
    pub skipped: Vec<SkippedFile>,
    pub batch_error: Option<BatchError>,
}

impl fmt::Display for SearchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files scanned, {} skipped in {}",
            self.files_scanned,
            self.files_skipped,
            humantime::format_duration(truncate_to_micros(self.elapsed))
        )?;
        if self.cache_hit {
            write!(f, " (cached)")?;
        }
        if self.truncated {
            write!(f, " (truncated)")?;
        }
        Ok(())
    }
}

fn truncate_to_micros(elapsed: Duration) -> Duration {
    Duration::from_micros(elapsed.as_micros() as u64)
}

/// Matches and summary returned by a search.
///
/// The match list is shared with the result cache, so cloning an output is
/// cheap and repeated searches hand out the same allocation.
#[derive(Debug, Clone)]
pub struct SearchOutput {
    pub matches: Arc<[Match]>,
    pub summary: SearchSummary,
}

impl SearchOutput {
    pub fn empty(summary: SearchSummary) -> Self {
        Self {
            matches: Arc::from(Vec::new()),
            summary,
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.iter()
    }

    /// Number of distinct files that contributed matches
    pub fn files_with_matches(&self) -> usize {
        let mut count = 0;
        let mut last: Option<&PathBuf> = None;
        for m in self.matches.iter() {
            if last != Some(&m.path) {
                count += 1;
                last = Some(&m.path);
            }
        }
        count
    }
}
