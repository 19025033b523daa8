pub mod cache;
pub mod config;
pub mod errors;
pub mod extract;
pub mod filters;
pub mod index;
pub mod metrics;
pub mod reader;
pub mod results;
pub mod search;

pub use config::{ConfigOverrides, EngineConfig, SearchOptions, SnapshotMode};
pub use errors::{SearchError, SearchResult};
pub use index::{FileDescriptor, FileFormat, FileIndex, FileIndexer};
pub use metrics::{ScanMetrics, ScanStats};
pub use results::{BatchError, Match, SearchOutput, SearchSummary, SkippedFile};
pub use search::{SearchEngine, TermMatcher};
