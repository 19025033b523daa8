//! Record extraction for the supported data formats.
//!
//! Each format turns a stream of [`Line`]s into a lazy stream of [`Record`]s.
//! The extractor is a closed enum over [`FileFormat`], so dispatch is a single
//! `match` and the format set cannot grow at runtime. Extraction is a single
//! forward pass: dropping the iterator stops reading the file.
//!
//! Items are `SearchResult<Record>`. A [`SearchError::Parse`] item means one
//! record or statement was malformed and skipped; any other error means the
//! underlying file could not be read further.
//!
//! [`SearchError::Parse`]: crate::errors::SearchError::Parse
mod delimited;
mod sql;
mod text;

pub use delimited::DelimitedRecords;
pub use sql::SqlRecords;
pub use text::LineRecords;

use std::path::Path;
use std::sync::Arc;

use crate::errors::SearchResult;
use crate::index::{FileDescriptor, FileFormat};
use crate::reader::Line;

/// One candidate unit of text: a line, a delimited row or a SQL value tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub source_path: Arc<Path>,
    /// 1-based line on which the record starts
    pub line_number: usize,
    pub raw_text: String,
    /// Parsed values; empty for line-text records
    pub field_values: Vec<String>,
    /// Column names from a header row or a SQL column list
    pub labels: Option<Arc<[String]>>,
}

impl Record {
    /// Label of the field at `index`, when the file provided one
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(index))
            .map(String::as_str)
    }
}

/// Format options for delimited files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub delimiter: char,
    pub has_header: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
        }
    }
}

/// Extractor selected for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordExtractor {
    Delimited { delimiter: char, has_header: bool },
    LineText,
    SqlDump,
}

impl RecordExtractor {
    pub fn for_format(format: FileFormat, options: &ExtractOptions) -> Self {
        match format {
            FileFormat::Delimited => RecordExtractor::Delimited {
                delimiter: options.delimiter,
                has_header: options.has_header,
            },
            FileFormat::LineText => RecordExtractor::LineText,
            FileFormat::SqlDump => RecordExtractor::SqlDump,
        }
    }

    pub fn for_descriptor(descriptor: &FileDescriptor, options: &ExtractOptions) -> Self {
        match Self::for_format(descriptor.format, options) {
            RecordExtractor::Delimited { has_header, .. } if descriptor.is_tab_separated() => {
                RecordExtractor::Delimited {
                    delimiter: '\t',
                    has_header,
                }
            }
            extractor => extractor,
        }
    }

    /// Wraps a line stream in the record iterator for this format
    pub fn extract<I>(&self, path: Arc<Path>, lines: I) -> Records<I>
    where
        I: Iterator<Item = SearchResult<Line>>,
    {
        match *self {
            RecordExtractor::Delimited {
                delimiter,
                has_header,
            } => Records::Delimited(DelimitedRecords::new(path, lines, delimiter, has_header)),
            RecordExtractor::LineText => Records::LineText(LineRecords::new(path, lines)),
            RecordExtractor::SqlDump => Records::SqlDump(SqlRecords::new(path, lines)),
        }
    }
}

/// Lazy record stream for any supported format
pub enum Records<I> {
    Delimited(DelimitedRecords<I>),
    LineText(LineRecords<I>),
    SqlDump(SqlRecords<I>),
}

impl<I> Iterator for Records<I>
where
    I: Iterator<Item = SearchResult<Line>>,
{
    type Item = SearchResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Records::Delimited(records) => records.next(),
            Records::LineText(records) => records.next(),
            Records::SqlDump(records) => records.next(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds an in-memory line stream the way `SourceLines` would
    pub fn lines(content: &str) -> impl Iterator<Item = SearchResult<Line>> {
        let body = content.strip_suffix('\n').unwrap_or(content);
        let segments: Vec<&str> = if content.is_empty() {
            Vec::new()
        } else {
            body.split('\n').collect()
        };
        segments
            .into_iter()
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .enumerate()
            .map(|(i, text)| {
                Ok(Line {
                    number: i + 1,
                    text,
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn path(name: &str) -> Arc<Path> {
        Arc::from(Path::new(name))
    }
}
