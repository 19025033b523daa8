use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

use super::matcher::TermMatcher;
use crate::config::EngineConfig;
use crate::errors::{SearchError, SearchResult};
use crate::extract::{ExtractOptions, Record, RecordExtractor};
use crate::index::{FileDescriptor, FileIndex};
use crate::metrics::ScanMetrics;
use crate::reader::ScanSource;
use crate::results::{BatchError, Match, SearchSummary, SkippedFile};

const NO_CUTOFF: usize = usize::MAX;

/// Per-search scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mmap_threshold: u64,
    pub extract: ExtractOptions,
    /// Also test parsed field values, not just the raw record text
    pub match_fields: bool,
    pub workers: usize,
}

impl From<&EngineConfig> for ScanSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            mmap_threshold: config.mmap_threshold,
            extract: ExtractOptions {
                delimiter: config.delimiter,
                has_header: config.has_header,
            },
            match_fields: config.match_fields,
            workers: config.thread_count.get(),
        }
    }
}

/// Ordered matches plus the scan part of the summary. `elapsed` is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub matches: Vec<Match>,
    pub summary: SearchSummary,
}

#[derive(Debug)]
enum FileOutcome {
    Scanned {
        matches: Vec<Match>,
        records_skipped: usize,
        /// Records were left unread because of the result cap
        cut_short: bool,
    },
    Failed(SearchError),
    /// Past the cutoff before the file was opened
    NotStarted,
}

impl FileOutcome {
    fn match_count(&self) -> usize {
        match self {
            FileOutcome::Scanned { matches, .. } => matches.len(),
            _ => 0,
        }
    }
}

#[derive(Debug)]
struct Progress {
    /// Match counts of finished files, by file index
    completed: Vec<Option<usize>>,
    /// First file index that has not finished
    frontier: usize,
    prefix_matches: usize,
}

/// Shared cancellation state for one scan.
///
/// Once the files `0..=c` have all finished and together hold at least
/// `max_results` matches, `c` is published as the cutoff. Files after the
/// cutoff can no longer contribute to the first `max_results` matches, so
/// their workers stop before pulling another record.
#[derive(Debug)]
struct ScanControl {
    cutoff: AtomicUsize,
    /// Matches collected by all workers, files past the cutoff included.
    /// Only logged; stopping is decided by `cutoff` alone.
    found: AtomicUsize,
    progress: Mutex<Progress>,
    max_results: usize,
}

impl ScanControl {
    fn new(files: usize, max_results: usize) -> Self {
        Self {
            cutoff: AtomicUsize::new(NO_CUTOFF),
            found: AtomicUsize::new(0),
            progress: Mutex::new(Progress {
                completed: vec![None; files],
                frontier: 0,
                prefix_matches: 0,
            }),
            max_results,
        }
    }

    fn should_stop(&self, file_idx: usize) -> bool {
        file_idx > self.cutoff.load(Ordering::Acquire)
    }

    fn cutoff(&self) -> Option<usize> {
        match self.cutoff.load(Ordering::Acquire) {
            NO_CUTOFF => None,
            c => Some(c),
        }
    }

    fn complete(&self, file_idx: usize, matches: usize) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.completed[file_idx] = Some(matches);

        if self.cutoff().is_some() {
            return;
        }
        while let Some(Some(count)) = progress.completed.get(progress.frontier).copied() {
            progress.prefix_matches += count;
            progress.frontier += 1;
            if progress.prefix_matches >= self.max_results {
                let cutoff = progress.frontier - 1;
                debug!("Result cap reached, cancelling files after #{}", cutoff);
                self.cutoff.store(cutoff, Ordering::Release);
                break;
            }
        }
    }
}

/// Fans a query out over the indexed files with a fixed-size worker pool
#[derive(Debug, Clone)]
pub struct Scheduler {
    settings: ScanSettings,
    metrics: ScanMetrics,
}

impl Scheduler {
    pub fn new(settings: ScanSettings, metrics: ScanMetrics) -> Self {
        Self { settings, metrics }
    }

    /// Scans every file in `index` for `matcher`, returning at most
    /// `max_results` matches in (file index, line number) order.
    ///
    /// The result equals a single-threaded pass in index order truncated at
    /// `max_results`, however the workers interleave. File errors are
    /// reported in the summary; only a failure to start the pool is an `Err`.
    pub fn run(
        &self,
        index: &FileIndex,
        matcher: &TermMatcher,
        max_results: usize,
    ) -> SearchResult<ScanOutcome> {
        let max_results = max_results.max(1);
        let file_count = index.len();
        let workers = self.settings.workers.clamp(1, file_count.max(1));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dbscout-worker-{}", i))
            .build()
            .map_err(|e| SearchError::config_error(format!("cannot start worker pool: {}", e)))?;

        let control = ScanControl::new(file_count, max_results);
        let next_file = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(file_count));

        debug!("Scanning {} files with {} workers", file_count, workers);
        pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| loop {
                    // Files are handed out in index order
                    let idx = next_file.fetch_add(1, Ordering::Relaxed);
                    let Some(descriptor) = index.files.get(idx) else {
                        break;
                    };
                    let outcome = self.scan_file(idx, descriptor, matcher, &control, max_results);
                    control.complete(idx, outcome.match_count());
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((idx, outcome));
                });
            }
        });

        let mut outcomes = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcomes.sort_by_key(|(idx, _)| *idx);

        debug!(
            "Workers found {} matches before merging",
            control.found.load(Ordering::Relaxed)
        );
        Ok(self.merge(index, outcomes, control.cutoff(), max_results))
    }

    fn merge(
        &self,
        index: &FileIndex,
        outcomes: Vec<(usize, FileOutcome)>,
        cutoff: Option<usize>,
        max_results: usize,
    ) -> ScanOutcome {
        let mut matches = Vec::new();
        let mut summary = SearchSummary::default();
        let mut failed = 0;

        for (idx, outcome) in outcomes {
            if let FileOutcome::Failed(_) = outcome {
                self.metrics.record_file_skipped();
            }
            // Whether a worker reached a file past the cutoff depends on timing
            if cutoff.is_some_and(|c| idx > c) {
                continue;
            }
            match outcome {
                FileOutcome::Scanned {
                    matches: mut file_matches,
                    records_skipped,
                    cut_short,
                } => {
                    summary.files_scanned += 1;
                    summary.records_skipped += records_skipped;
                    summary.truncated |= cut_short;
                    file_matches.sort_by_key(|m| m.line_number);
                    matches.extend(file_matches);
                }
                FileOutcome::Failed(err) => {
                    failed += 1;
                    summary.files_skipped += 1;
                    summary.skipped.push(SkippedFile {
                        path: index.files[idx].path.clone(),
                        reason: err.to_string(),
                    });
                }
                FileOutcome::NotStarted => {}
            }
        }

        // Files after the cutoff were never guaranteed a full scan
        if cutoff.is_some_and(|c| c + 1 < index.len()) {
            summary.truncated = true;
        }
        if matches.len() > max_results {
            matches.truncate(max_results);
            summary.truncated = true;
        }

        if failed > 0 && failed == index.len() {
            let batch = BatchError {
                failed_files: failed,
            };
            warn!("{}", batch);
            summary.batch_error = Some(batch);
        }

        ScanOutcome { matches, summary }
    }

    fn scan_file(
        &self,
        idx: usize,
        descriptor: &FileDescriptor,
        matcher: &TermMatcher,
        control: &ScanControl,
        max_results: usize,
    ) -> FileOutcome {
        if control.should_stop(idx) {
            trace!("Not opening {}: past the cutoff", descriptor.path.display());
            return FileOutcome::NotStarted;
        }

        let source = match ScanSource::open(descriptor, self.settings.mmap_threshold) {
            Ok(source) => source,
            Err(err) => {
                warn!("Skipping {}: {}", descriptor.path.display(), err);
                return FileOutcome::Failed(err);
            }
        };
        trace!(
            "Scanning {} ({:?}, {:?})",
            descriptor.path.display(),
            descriptor.format,
            source.strategy()
        );
        self.metrics
            .record_file_scanned(source.strategy(), descriptor.size_bytes);

        let extractor = RecordExtractor::for_descriptor(descriptor, &self.settings.extract);
        let path: Arc<Path> = Arc::from(descriptor.path.as_path());
        let mut records = extractor.extract(path, source.into_lines());

        let mut matches = Vec::new();
        let mut extracted = 0u64;
        let mut skipped = 0usize;
        let mut cut_short = false;

        loop {
            if control.should_stop(idx) {
                cut_short = true;
                break;
            }
            let record = match records.next() {
                None => break,
                Some(Ok(record)) => record,
                Some(Err(err @ SearchError::Parse { .. })) => {
                    debug!("{}", err);
                    skipped += 1;
                    continue;
                }
                Some(Err(err)) => {
                    warn!("Skipping {}: {}", descriptor.path.display(), err);
                    self.metrics.record_records(extracted, skipped as u64);
                    return FileOutcome::Failed(err);
                }
            };
            extracted += 1;

            if let Some(m) = self.match_record(&record, descriptor, matcher) {
                matches.push(m);
                control.found.fetch_add(1, Ordering::Relaxed);
                if matches.len() >= max_results {
                    // This file alone fills the cap
                    cut_short = records.next().is_some();
                    break;
                }
            }
        }

        self.metrics.record_records(extracted, skipped as u64);
        FileOutcome::Scanned {
            matches,
            records_skipped: skipped,
            cut_short,
        }
    }

    /// Tests the raw record text first, then each parsed field value
    fn match_record(
        &self,
        record: &Record,
        descriptor: &FileDescriptor,
        matcher: &TermMatcher,
    ) -> Option<Match> {
        if let Some(range) = matcher.find(&record.raw_text) {
            let matched_field = match record.labels {
                Some(_) => record
                    .field_values
                    .iter()
                    .position(|value| matcher.is_match(value))
                    .and_then(|i| record.label(i))
                    .map(str::to_string),
                None => None,
            };
            return Some(Match {
                path: descriptor.path.clone(),
                line_number: record.line_number,
                matched_text: record.raw_text.clone(),
                start: range.start,
                end: range.end,
                format: descriptor.format,
                matched_field,
            });
        }

        if !self.settings.match_fields {
            return None;
        }
        record
            .field_values
            .iter()
            .enumerate()
            .find_map(|(i, value)| {
                matcher.find(value).map(|range| Match {
                    path: descriptor.path.clone(),
                    line_number: record.line_number,
                    matched_text: value.clone(),
                    start: range.start,
                    end: range.end,
                    format: descriptor.format,
                    matched_field: record.label(i).map(str::to_string),
                })
            })
    }
}
