use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, trace, warn};

use crate::config::SnapshotMode;
use crate::errors::{SearchError, SearchResult};
use crate::filters::{compile_patterns, should_include_file};
use crate::results::SkippedFile;

/// Record layout of a data file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Delimited,
    LineText,
    SqlDump,
}

impl FileFormat {
    /// Maps an extension to a format. Unknown extensions that made it through
    /// the allowlist are treated as plain lines.
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv") {
            FileFormat::Delimited
        } else if ext.eq_ignore_ascii_case("sql") {
            FileFormat::SqlDump
        } else {
            FileFormat::LineText
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileFormat::LineText)
    }
}

/// A file selected for scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: FileFormat,
}

impl FileDescriptor {
    /// Tab-separated files override the configured delimiter
    pub fn is_tab_separated(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
    }
}

/// Files found under a root, in scan order
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub root: PathBuf,
    pub files: Vec<FileDescriptor>,
    /// Entries that could not be walked or stat'ed
    pub warnings: Vec<SkippedFile>,
    /// Identifies this set of files for cache keys
    pub snapshot_id: u64,
}

impl FileIndex {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }
}

/// Enumerates data files under a root directory
#[derive(Debug, Clone)]
pub struct FileIndexer {
    extensions: Vec<String>,
    ignore_patterns: Vec<glob::Pattern>,
    snapshot_mode: SnapshotMode,
}

impl FileIndexer {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.to_vec(),
            ignore_patterns: Vec::new(),
            snapshot_mode: SnapshotMode::default(),
        }
    }

    pub fn with_ignore_patterns(mut self, patterns: &[String]) -> Self {
        self.ignore_patterns = compile_patterns(patterns);
        self
    }

    pub fn with_snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.snapshot_mode = mode;
        self
    }

    /// Walks `root` recursively and returns every file whose extension is in
    /// the allowlist.
    ///
    /// Returns [`SearchError::EmptyIndex`] if the root is missing or holds no
    /// matching files, and a configuration error if it is not a directory.
    pub fn index(&self, root: &Path) -> SearchResult<FileIndex> {
        if !root.exists() {
            debug!("Root {} does not exist", root.display());
            return Err(SearchError::empty_index(root));
        }
        if !root.is_dir() {
            return Err(SearchError::config_error(format!(
                "search root is not a directory: {}",
                root.display()
            )));
        }

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(true)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        let mut warnings = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = error_path(&err).unwrap_or(root).to_path_buf();
                    warn!("Skipping {}: {}", path.display(), err);
                    warnings.push(SkippedFile {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if !should_include_file(path, root, &self.extensions, &self.ignore_patterns) {
                trace!("Filtered out {}", path.display());
                continue;
            }

            // The file may vanish between enumeration and stat
            match fs::metadata(path) {
                Ok(metadata) => files.push(FileDescriptor {
                    path: path.to_path_buf(),
                    size_bytes: metadata.len(),
                    format: FileFormat::from_path(path),
                }),
                Err(err) => {
                    warn!("Cannot stat {}: {}", path.display(), err);
                    warnings.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: SearchError::file_access(path, err).to_string(),
                    });
                }
            }
        }

        if files.is_empty() {
            debug!(
                "No files with extensions {:?} under {}",
                self.extensions,
                root.display()
            );
            return Err(SearchError::empty_index(root));
        }

        let snapshot_id = snapshot_id(&files, self.snapshot_mode);
        debug!(
            "Indexed {} files under {} (snapshot {:016x})",
            files.len(),
            root.display(),
            snapshot_id
        );

        Ok(FileIndex {
            root: root.to_path_buf(),
            files,
            warnings,
            snapshot_id,
        })
    }
}

/// Hash of the sorted path list, optionally with size and mtime per file
fn snapshot_id(files: &[FileDescriptor], mode: SnapshotMode) -> u64 {
    let mut sorted: Vec<&FileDescriptor> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = DefaultHasher::new();
    for file in sorted {
        file.path.hash(&mut hasher);
        if mode == SnapshotMode::Signatures {
            file.size_bytes.hash(&mut hasher);
            let mtime = fs::metadata(&file.path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
            mtime.hash(&mut hasher);
        }
    }
    hasher.finish()
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}
