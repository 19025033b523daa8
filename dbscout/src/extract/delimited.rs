use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::Record;
use crate::errors::{SearchError, SearchResult};
use crate::reader::Line;

const QUOTE: char = '"';

/// Physical lines a quoted field may span before the row is rejected
const MAX_CONTINUATION_LINES: usize = 1024;
/// Bytes a quoted row may hold before it is rejected
const MAX_ROW_BYTES: usize = 1 << 20;

/// Splits one logical row into fields, possibly across several physical lines
struct FieldSplitter {
    delimiter: char,
    fields: Vec<String>,
    current: String,
    in_quotes: bool,
}

impl FieldSplitter {
    fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            fields: Vec::new(),
            current: String::new(),
            in_quotes: false,
        }
    }

    /// Consumes one physical line. Returns true if a quoted field is still open.
    fn feed(&mut self, text: &str) -> bool {
        let mut chars = text.chars().peekable();
        let mut at_field_start = self.current.is_empty() && !self.in_quotes;

        while let Some(c) = chars.next() {
            if self.in_quotes {
                if c == QUOTE {
                    if chars.peek() == Some(&QUOTE) {
                        chars.next();
                        self.current.push(QUOTE);
                    } else {
                        self.in_quotes = false;
                    }
                } else {
                    self.current.push(c);
                }
                continue;
            }

            if c == self.delimiter {
                self.fields.push(std::mem::take(&mut self.current));
                at_field_start = true;
            } else if c == QUOTE && at_field_start {
                self.in_quotes = true;
                at_field_start = false;
            } else {
                // Quotes in the middle of an unquoted field are literal
                self.current.push(c);
                at_field_start = false;
            }
        }

        if self.in_quotes {
            self.current.push('\n');
        }
        self.in_quotes
    }

    fn finish(mut self) -> Vec<String> {
        self.fields.push(self.current);
        self.fields
    }
}

/// Delimiter-separated rows with optional header and RFC 4180 style quoting
pub struct DelimitedRecords<I> {
    path: Arc<Path>,
    lines: I,
    delimiter: char,
    header_pending: bool,
    labels: Option<Arc<[String]>>,
    /// Lines read ahead for a quoted field that never closed
    replay: VecDeque<Line>,
}

impl<I> DelimitedRecords<I> {
    pub fn new(path: Arc<Path>, lines: I, delimiter: char, has_header: bool) -> Self {
        Self {
            path,
            lines,
            delimiter,
            header_pending: has_header,
            labels: None,
            replay: VecDeque::new(),
        }
    }
}

impl<I> DelimitedRecords<I>
where
    I: Iterator<Item = SearchResult<Line>>,
{
    fn next_line(&mut self) -> Option<SearchResult<Line>> {
        match self.replay.pop_front() {
            Some(line) => Some(Ok(line)),
            None => self.lines.next(),
        }
    }
}

impl<I> Iterator for DelimitedRecords<I>
where
    I: Iterator<Item = SearchResult<Line>>,
{
    type Item = SearchResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.text.is_empty() {
                continue;
            }

            let line_number = line.number;
            let mut raw_text = line.text;
            let mut splitter = FieldSplitter::new(self.delimiter);
            let mut open = splitter.feed(&raw_text);

            // A quoted field may contain line breaks
            let mut continuation: Vec<Line> = Vec::new();
            let mut row_bytes = raw_text.len();
            while open
                && continuation.len() < MAX_CONTINUATION_LINES
                && row_bytes <= MAX_ROW_BYTES
            {
                match self.next_line() {
                    Some(Ok(next)) => {
                        row_bytes += next.text.len() + 1;
                        open = splitter.feed(&next.text);
                        continuation.push(next);
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => break,
                }
            }

            if open {
                // Only the opening row is rejected; what followed it is read again as rows
                for next in continuation.into_iter().rev() {
                    self.replay.push_front(next);
                }
                self.header_pending = false;
                return Some(Err(SearchError::parse(
                    self.path.to_path_buf(),
                    line_number,
                    "unterminated quoted field",
                )));
            }
            for next in &continuation {
                raw_text.push('\n');
                raw_text.push_str(&next.text);
            }

            let field_values = splitter.finish();

            if self.header_pending {
                self.header_pending = false;
                debug!(
                    "Header of {}: {} columns",
                    self.path.display(),
                    field_values.len()
                );
                self.labels = Some(Arc::from(field_values));
                continue;
            }

            return Some(Ok(Record {
                source_path: Arc::clone(&self.path),
                line_number,
                raw_text,
                field_values,
                labels: self.labels.clone(),
            }));
        }
    }
}
