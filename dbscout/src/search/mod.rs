//! Query execution: term matching, parallel scanning and the engine facade.
//!
//! A search flows through these pieces:
//! 1. [`TermMatcher`] normalizes the term (trim and casefold)
//! 2. The [`FileIndexer`](crate::index::FileIndexer) lists the files under the root
//! 3. The [`ResultCache`](crate::cache::ResultCache) answers repeated queries
//! 4. On a miss the [`Scheduler`] scans the files with a fixed worker pool
//!
//! ```rust,ignore
//! let engine = SearchEngine::new(EngineConfig::default())?;
//! let output = engine.search("john", &SearchOptions::new("base"))?;
//! for m in output.iter() {
//!     println!("{}:{}: {}", m.path.display(), m.line_number, m.matched_text);
//! }
//! println!("{}", output.summary);
//! ```
pub mod engine;
pub mod matcher;
pub mod scheduler;

pub use engine::SearchEngine;
pub use matcher::{casefold, TermMatcher};
pub use scheduler::{ScanOutcome, ScanSettings, Scheduler};
