use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::reader::ReadStrategy;

/// Counters for scanning and caching, shared by every search of an engine
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // File processing metrics
    buffered_files_scanned: Arc<AtomicU64>,
    mmap_files_scanned: Arc<AtomicU64>,
    files_skipped: Arc<AtomicU64>,
    bytes_scanned: Arc<AtomicU64>,

    // Record metrics
    records_extracted: Arc<AtomicU64>,
    records_skipped: Arc<AtomicU64>,

    // Cache metrics
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            buffered_files_scanned: Arc::new(AtomicU64::new(0)),
            mmap_files_scanned: Arc::new(AtomicU64::new(0)),
            files_skipped: Arc::new(AtomicU64::new(0)),
            bytes_scanned: Arc::new(AtomicU64::new(0)),
            records_extracted: Arc::new(AtomicU64::new(0)),
            records_skipped: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a file opened for scanning
    pub fn record_file_scanned(&self, strategy: ReadStrategy, size: u64) {
        match strategy {
            ReadStrategy::Buffered => self.buffered_files_scanned.fetch_add(1, Ordering::Relaxed),
            ReadStrategy::Mapped => self.mmap_files_scanned.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_scanned.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the records pulled from one file and how many were malformed
    pub fn record_records(&self, extracted: u64, skipped: u64) {
        self.records_extracted.fetch_add(extracted, Ordering::Relaxed);
        self.records_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gets a snapshot of all counters
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            buffered_files: self.buffered_files_scanned.load(Ordering::Relaxed),
            mmap_files: self.mmap_files_scanned.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            records_extracted: self.records_extracted.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        debug!(
            "Scan stats:\n\
             Files scanned (buffered/mmap): {}/{}\n\
             Files skipped: {}\n\
             Bytes scanned: {}\n\
             Records extracted/skipped: {}/{}\n\
             Cache hits/misses: {}/{}",
            stats.buffered_files,
            stats.mmap_files,
            stats.files_skipped,
            stats.bytes_scanned,
            stats.records_extracted,
            stats.records_skipped,
            stats.cache_hits,
            stats.cache_misses
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ScanMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub buffered_files: u64,
    pub mmap_files: u64,
    pub files_skipped: u64,
    pub bytes_scanned: u64,
    pub records_extracted: u64,
    pub records_skipped: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl ScanStats {
    /// Files opened by either read strategy
    pub fn files_scanned(&self) -> u64 {
        self.buffered_files + self.mmap_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_tracking() {
        let metrics = ScanMetrics::new();

        metrics.record_file_scanned(ReadStrategy::Buffered, 1000);
        metrics.record_file_scanned(ReadStrategy::Mapped, 20_000_000);
        metrics.record_file_skipped();

        let stats = metrics.get_stats();
        assert_eq!(stats.buffered_files, 1);
        assert_eq!(stats.mmap_files, 1);
        assert_eq!(stats.files_scanned(), 2);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.bytes_scanned, 20_001_000);
    }

    #[test]
    fn test_record_and_cache_tracking() {
        let metrics = ScanMetrics::new();
        metrics.record_records(10, 2);
        metrics.record_records(5, 0);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);

        let stats = metrics.get_stats();
        assert_eq!(stats.records_extracted, 15);
        assert_eq!(stats.records_skipped, 2);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ScanMetrics::new();
        let clone = metrics.clone();
        clone.record_file_skipped();
        assert_eq!(metrics.get_stats().files_skipped, 1);
    }
}
