use std::path::Path;
use std::sync::Arc;

use super::Record;
use crate::errors::SearchResult;
use crate::reader::Line;

/// Line-oriented text: every physical line is one record, verbatim
pub struct LineRecords<I> {
    path: Arc<Path>,
    lines: I,
}

impl<I> LineRecords<I> {
    pub fn new(path: Arc<Path>, lines: I) -> Self {
        Self { path, lines }
    }
}

impl<I> Iterator for LineRecords<I>
where
    I: Iterator<Item = SearchResult<Line>>,
{
    type Item = SearchResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(Record {
            source_path: Arc::clone(&self.path),
            line_number: line.number,
            raw_text: line.text,
            field_values: Vec::new(),
            labels: None,
        }))
    }
}
