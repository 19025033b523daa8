use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::{SearchError, SearchResult};

/// Files above this size are memory-mapped instead of read through a buffer.
pub const DEFAULT_MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_RESULTS: usize = 10_000;
pub const DEFAULT_PARALLEL_WORKERS: usize = 4;
pub const DEFAULT_CACHE_CAPACITY: usize = 128;
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "txt", "sql"];

/// How the index snapshot id used in cache keys is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Hash of the sorted path list only. Edits to existing files do not
    /// invalidate cached results.
    #[default]
    Paths,
    /// Sorted paths plus each file's size and modification time.
    Signatures,
}

/// Static engine configuration.
///
/// Loaded from YAML in order of increasing precedence:
/// 1. Global `$HOME/.config/dbscout/config.yaml`
/// 2. Local `.dbscout.yaml` in the current directory
/// 3. A file passed explicitly (the CLI's `--config` flag)
///
/// ```yaml
/// root_path: "base"
/// file_extensions: ["csv", "txt", "sql"]
/// ignore_patterns: ["**/archive/**"]
/// max_results: 10000
/// thread_count: 4
/// mmap_threshold: 10485760
/// cache_capacity: 128
/// delimiter: ","
/// has_header: true
/// snapshot_mode: paths
/// log_level: "warn"
/// ```
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the data files
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Extensions to index, without the leading dot, compared case-insensitively
    #[serde(default = "default_extensions")]
    pub file_extensions: Vec<String>,

    /// Glob patterns for paths to leave out of the index
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Result cap applied when a search does not set its own
    #[serde(default = "default_max_results")]
    pub max_results: NonZeroUsize,

    /// Worker threads per search
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Size in bytes above which files are memory-mapped
    #[serde(default = "default_mmap_threshold")]
    pub mmap_threshold: u64,

    /// Number of distinct queries kept in the result cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: NonZeroUsize,

    /// Field delimiter for delimited files (tsv files always use a tab)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Whether the first row of a delimited file is a header
    #[serde(default = "default_true")]
    pub has_header: bool,

    /// Also match the term against individual delimited field values
    #[serde(default = "default_true")]
    pub match_fields: bool,

    #[serde(default)]
    pub snapshot_mode: SnapshotMode,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_root_path() -> PathBuf {
    PathBuf::from("base")
}

fn default_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_max_results() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_MAX_RESULTS).unwrap_or(NonZeroUsize::MIN)
}

fn default_thread_count() -> NonZeroUsize {
    let workers = DEFAULT_PARALLEL_WORKERS.min(num_cpus::get());
    NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN)
}

fn default_mmap_threshold() -> u64 {
    DEFAULT_MMAP_THRESHOLD
}

fn default_cache_capacity() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            file_extensions: default_extensions(),
            ignore_patterns: Vec::new(),
            max_results: default_max_results(),
            thread_count: default_thread_count(),
            mmap_threshold: default_mmap_threshold(),
            cache_capacity: default_cache_capacity(),
            delimiter: default_delimiter(),
            has_header: true,
            match_fields: true,
            snapshot_mode: SnapshotMode::default(),
            log_level: default_log_level(),
        }
    }
}

/// Values supplied on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root_path: Option<PathBuf>,
    pub file_extensions: Option<Vec<String>>,
    pub ignore_patterns: Vec<String>,
    pub max_results: Option<NonZeroUsize>,
    pub thread_count: Option<NonZeroUsize>,
    pub delimiter: Option<char>,
    pub no_header: bool,
    pub log_level: Option<String>,
}

impl EngineConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, layering `config_path` over the default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("dbscout/config.yaml")),
            Some(PathBuf::from(".dbscout.yaml")),
        ];
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit path must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Overlays command-line values onto the loaded configuration
    pub fn merge_with_cli(mut self, cli: ConfigOverrides) -> Self {
        if let Some(root) = cli.root_path {
            self.root_path = root;
        }
        if let Some(exts) = cli.file_extensions {
            self.file_extensions = exts;
        }
        if !cli.ignore_patterns.is_empty() {
            self.ignore_patterns = cli.ignore_patterns;
        }
        if let Some(max) = cli.max_results {
            self.max_results = max;
        }
        if let Some(threads) = cli.thread_count {
            self.thread_count = threads;
        }
        if let Some(delimiter) = cli.delimiter {
            self.delimiter = delimiter;
        }
        if cli.no_header {
            self.has_header = false;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        self
    }

    /// Checks values that the type system does not already rule out
    pub fn validate(&self) -> SearchResult<()> {
        if self.file_extensions.is_empty() {
            return Err(SearchError::config_error(
                "file_extensions must list at least one extension",
            ));
        }
        if self.delimiter == '"' || self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(SearchError::config_error(format!(
                "{:?} cannot be used as a field delimiter",
                self.delimiter
            )));
        }
        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                SearchError::config_error(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// Per-search options; anything not set here comes from the engine config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub root_path: PathBuf,
    pub max_results: usize,
    pub file_extensions: Vec<String>,
    pub parallel_workers: usize,
}

impl SearchOptions {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::from(&EngineConfig::default())
        }
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.max_results == 0 {
            return Err(SearchError::config_error("max_results must be at least 1"));
        }
        if self.parallel_workers == 0 {
            return Err(SearchError::config_error(
                "parallel_workers must be at least 1",
            ));
        }
        if self.file_extensions.is_empty() {
            return Err(SearchError::config_error(
                "at least one file extension is required",
            ));
        }
        Ok(())
    }
}

impl From<&EngineConfig> for SearchOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            root_path: config.root_path.clone(),
            max_results: config.max_results.get(),
            file_extensions: config.file_extensions.clone(),
            parallel_workers: config.thread_count.get(),
        }
    }
}
