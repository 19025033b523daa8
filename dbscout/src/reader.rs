use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

use crate::errors::{SearchError, SearchResult};
use crate::index::FileDescriptor;

const BUFFER_CAPACITY: usize = 65536;
const UTF8_BOM: &str = "\u{feff}";

/// How a file's bytes reach the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    Buffered,
    Mapped,
}

/// One physical line with its line ending removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based
    pub number: usize,
    pub text: String,
}

/// An open file ready to be scanned line by line
#[derive(Debug)]
pub enum ScanSource {
    Buffered {
        path: PathBuf,
        reader: BufReader<File>,
    },
    Mapped {
        path: PathBuf,
        mmap: Mmap,
    },
}

impl ScanSource {
    /// Opens a file, memory-mapping it when it is larger than `mmap_threshold`
    pub fn open(descriptor: &FileDescriptor, mmap_threshold: u64) -> SearchResult<Self> {
        let path = &descriptor.path;
        let file = File::open(path).map_err(|e| SearchError::file_access(path, e))?;

        if descriptor.size_bytes > mmap_threshold {
            trace!("Memory-mapping {} ({} bytes)", path.display(), descriptor.size_bytes);
            // Safety: the mapping is read-only and data files are treated as
            // immutable inputs for the duration of a scan.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SearchError::file_access(path, e))?;
            Ok(ScanSource::Mapped {
                path: path.clone(),
                mmap,
            })
        } else {
            trace!("Buffered read of {} ({} bytes)", path.display(), descriptor.size_bytes);
            Ok(ScanSource::Buffered {
                path: path.clone(),
                reader: BufReader::with_capacity(BUFFER_CAPACITY, file),
            })
        }
    }

    pub fn strategy(&self) -> ReadStrategy {
        match self {
            ScanSource::Buffered { .. } => ReadStrategy::Buffered,
            ScanSource::Mapped { .. } => ReadStrategy::Mapped,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ScanSource::Buffered { path, .. } | ScanSource::Mapped { path, .. } => path,
        }
    }

    /// Iterates over the lines of the file. Both strategies yield identical lines.
    pub fn into_lines(self) -> SourceLines {
        SourceLines {
            source: self,
            offset: 0,
            buf: Vec::with_capacity(256),
            line_number: 0,
            lossy_reported: false,
            done: false,
        }
    }
}

/// Lazy line iterator over a [`ScanSource`].
///
/// Splits on `\n`, drops a trailing `\r`, and replaces invalid UTF-8 with
/// U+FFFD. Reading stops as soon as the iterator is dropped.
#[derive(Debug)]
pub struct SourceLines {
    source: ScanSource,
    offset: usize,
    buf: Vec<u8>,
    line_number: usize,
    lossy_reported: bool,
    done: bool,
}

impl SourceLines {
    fn next_raw(&mut self) -> Option<SearchResult<&[u8]>> {
        match &mut self.source {
            ScanSource::Buffered { path, reader } => {
                self.buf.clear();
                match reader.read_until(b'\n', &mut self.buf) {
                    Ok(0) => None,
                    Ok(_) => Some(Ok(self.buf.as_slice())),
                    Err(e) => Some(Err(SearchError::file_access(path, e))),
                }
            }
            ScanSource::Mapped { mmap, .. } => {
                let rest = &mmap[self.offset..];
                if rest.is_empty() {
                    return None;
                }
                let len = memchr::memchr(b'\n', rest).map_or(rest.len(), |i| i + 1);
                self.offset += len;
                Some(Ok(&rest[..len]))
            }
        }
    }
}

impl Iterator for SourceLines {
    type Item = SearchResult<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let raw = match self.next_raw() {
            None => {
                self.done = true;
                return None;
            }
            Some(Err(e)) => {
                self.done = true;
                return Some(Err(e));
            }
            Some(Ok(raw)) => raw,
        };

        let mut bytes = raw;
        if let Some(stripped) = bytes.strip_suffix(b"\n") {
            bytes = stripped;
        }
        if let Some(stripped) = bytes.strip_suffix(b"\r") {
            bytes = stripped;
        }

        let (text, lossy) = match String::from_utf8_lossy(bytes) {
            Cow::Borrowed(text) => (text.to_owned(), false),
            Cow::Owned(text) => (text, true),
        };

        self.line_number += 1;
        if lossy && !self.lossy_reported {
            self.lossy_reported = true;
            warn!(
                "Invalid UTF-8 replaced in {} (first at line {})",
                self.source.path().display(),
                self.line_number
            );
        }

        let text = if self.line_number == 1 {
            match text.strip_prefix(UTF8_BOM) {
                Some(stripped) => stripped.to_string(),
                None => text,
            }
        } else {
            text
        };

        Some(Ok(Line {
            number: self.line_number,
            text,
        }))
    }
}
