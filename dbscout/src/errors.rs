//! Error types for dbscout.
//!
//! Only a few of these ever escape [`crate::SearchEngine::search`]: an empty
//! query, a bad configuration, or a corrupted result cache. File access and
//! parse failures are raised per file or per record, then folded into the
//! search summary by the scheduler so one bad file never fails a search.
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur during indexing, scanning and caching
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Failed to read {path}: {source}")]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error in {path} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("No searchable files under {0}")]
    EmptyIndex(PathBuf),
    #[error("Result cache corrupted: {0}")]
    CacheCorruption(String),
    #[error("Search query cannot be empty")]
    EmptyQuery,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SearchError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Classifies an I/O error raised while opening or reading `path`.
    pub fn file_access(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::FileAccess {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn empty_index(root: impl Into<PathBuf>) -> Self {
        Self::EmptyIndex(root.into())
    }

    pub fn cache_corruption(msg: impl Into<String>) -> Self {
        Self::CacheCorruption(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
