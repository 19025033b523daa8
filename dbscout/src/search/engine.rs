use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::matcher::TermMatcher;
use super::scheduler::{ScanSettings, Scheduler};
use crate::cache::{CachedSearch, QueryKey, ResultCache};
use crate::config::{EngineConfig, SearchOptions};
use crate::errors::{SearchError, SearchResult};
use crate::index::{FileIndex, FileIndexer};
use crate::metrics::ScanMetrics;
use crate::results::{SearchOutput, SearchSummary};

/// Entry point for searching a directory of data files.
///
/// An engine owns the result cache and the metrics, so keep one around for
/// repeated searches. It is `Sync`; concurrent searches share the cache.
#[derive(Debug)]
pub struct SearchEngine {
    config: EngineConfig,
    cache: ResultCache,
    metrics: ScanMetrics,
}

impl SearchEngine {
    pub fn new(config: EngineConfig) -> SearchResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: ResultCache::new(config.cache_capacity.get()),
            metrics: ScanMetrics::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Searches for `term` using the options derived from the engine config
    pub fn search_default(&self, term: &str) -> SearchResult<SearchOutput> {
        self.search(term, &SearchOptions::from(&self.config))
    }

    /// Finds every record containing `term`, ignoring case.
    ///
    /// Matches are ordered by file (in index order) and line number, capped at
    /// `options.max_results`. A repeated query over an unchanged file set is
    /// answered from the cache without touching the files. Unreadable files
    /// are reported in the summary instead of failing the search.
    pub fn search(&self, term: &str, options: &SearchOptions) -> SearchResult<SearchOutput> {
        let start = Instant::now();
        let matcher = TermMatcher::new(term)?;
        options.validate()?;
        info!(
            "Searching {} for {:?}",
            options.root_path.display(),
            matcher.term()
        );

        let index = match self.index(options) {
            Ok(index) => index,
            Err(SearchError::EmptyIndex(root)) => {
                info!("No searchable files under {}", root.display());
                return Ok(SearchOutput::empty(SearchSummary {
                    empty_index: true,
                    elapsed: start.elapsed(),
                    ..Default::default()
                }));
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Indexed {} files ({} bytes)",
            index.len(),
            index.total_size()
        );

        let key = QueryKey::new(
            &matcher,
            options.max_results,
            &options.root_path,
            index.snapshot_id,
        );
        let scheduler = Scheduler::new(
            ScanSettings {
                workers: options.parallel_workers,
                ..ScanSettings::from(&self.config)
            },
            self.metrics.clone(),
        );

        let (cached, hit) = self.cache.get_or_compute(&key, || {
            let outcome = scheduler.run(&index, &matcher, options.max_results)?;
            Ok(CachedSearch::new(outcome.matches, outcome.summary))
        })?;
        self.metrics.record_cache_lookup(hit);

        let summary = self.summarize(&cached, &index, hit, start);
        info!("Found {} matches: {}", cached.matches.len(), summary);
        self.metrics.log_stats();

        Ok(SearchOutput {
            matches: Arc::clone(&cached.matches),
            summary,
        })
    }

    fn index(&self, options: &SearchOptions) -> SearchResult<FileIndex> {
        FileIndexer::new(&options.file_extensions)
            .with_ignore_patterns(&self.config.ignore_patterns)
            .with_snapshot_mode(self.config.snapshot_mode)
            .index(&options.root_path)
    }

    fn summarize(
        &self,
        cached: &CachedSearch,
        index: &FileIndex,
        hit: bool,
        start: Instant,
    ) -> SearchSummary {
        let mut summary = if hit {
            // Nothing was scanned for this call
            SearchSummary {
                truncated: cached.summary.truncated,
                cache_hit: true,
                ..Default::default()
            }
        } else {
            cached.summary.clone()
        };

        summary.files_skipped += index.warnings.len();
        summary.skipped.extend(index.warnings.iter().cloned());
        summary.elapsed = start.elapsed();
        summary
    }

    /// Number of files and their total size that a search with `options`
    /// would scan. An empty index is reported as zero files.
    pub fn file_stats(&self, options: &SearchOptions) -> SearchResult<(usize, u64)> {
        match self.index(options) {
            Ok(index) => Ok((index.len(), index.total_size())),
            Err(SearchError::EmptyIndex(_)) => Ok((0, 0)),
            Err(e) => Err(e),
        }
    }

    pub fn clear_cache(&self) -> SearchResult<()> {
        debug!("Clearing result cache");
        self.cache.clear()
    }

    /// Number of queries currently cached
    pub fn cached_queries(&self) -> usize {
        self.cache.len()
    }
}
