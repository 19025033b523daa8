//! In-memory result cache keyed by normalized query.
//!
//! Entries live in an arena of slots linked into a recency list, so a lookup
//! or an eviction is O(1) without relying on an ordered map. The whole list
//! sits behind one mutex that is only held for bookkeeping, never while files
//! are being scanned.
//!
//! Identical queries running at the same time are de-duplicated: the first
//! caller computes, later callers block on the same in-flight cell and share
//! its result.
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::errors::{SearchError, SearchResult};
use crate::results::{Match, SearchSummary};
use crate::search::TermMatcher;

/// Normalized identity of a search
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Trimmed, casefolded term
    pub term: String,
    pub max_results: usize,
    pub root: PathBuf,
    pub snapshot_id: u64,
}

impl QueryKey {
    pub fn new(matcher: &TermMatcher, max_results: usize, root: &Path, snapshot_id: u64) -> Self {
        Self {
            term: matcher.folded().to_string(),
            max_results,
            root: root.to_path_buf(),
            snapshot_id,
        }
    }
}

/// Outcome of one completed scan. Immutable once created.
#[derive(Debug, Clone)]
pub struct CachedSearch {
    pub matches: Arc<[Match]>,
    /// Summary of the scan that produced `matches`
    pub summary: SearchSummary,
}

impl CachedSearch {
    pub fn new(matches: Vec<Match>, summary: SearchSummary) -> Self {
        Self {
            matches: Arc::from(matches),
            summary,
        }
    }

    /// Scans where every file failed are not worth remembering
    pub fn is_cacheable(&self) -> bool {
        self.summary.batch_error.is_none()
    }
}

#[derive(Debug)]
struct Slot {
    key: QueryKey,
    value: Arc<CachedSearch>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena-backed LRU list; `head` is the most recently used entry
#[derive(Debug)]
struct LruList {
    slots: Vec<Option<Slot>>,
    index: HashMap<QueryKey, usize>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn slot(&self, idx: usize) -> SearchResult<&Slot> {
        self.slots
            .get(idx)
            .and_then(Option::as_ref)
            .ok_or_else(|| SearchError::cache_corruption(format!("slot {} is vacant", idx)))
    }

    fn slot_mut(&mut self, idx: usize) -> SearchResult<&mut Slot> {
        self.slots
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| SearchError::cache_corruption(format!("slot {} is vacant", idx)))
    }

    fn get(&mut self, key: &QueryKey) -> SearchResult<Option<Arc<CachedSearch>>> {
        let Some(&idx) = self.index.get(key) else {
            return Ok(None);
        };
        self.promote(idx)?;
        Ok(Some(Arc::clone(&self.slot(idx)?.value)))
    }

    fn insert(&mut self, key: QueryKey, value: Arc<CachedSearch>) -> SearchResult<()> {
        if let Some(&idx) = self.index.get(&key) {
            self.slot_mut(idx)?.value = value;
            return self.promote(idx);
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx)?;

        if self.len() > self.capacity {
            self.evict_lru()?;
        }
        Ok(())
    }

    fn promote(&mut self, idx: usize) -> SearchResult<()> {
        if self.head == Some(idx) {
            return Ok(());
        }
        self.unlink(idx)?;
        self.push_front(idx)
    }

    fn unlink(&mut self, idx: usize) -> SearchResult<()> {
        let (prev, next) = {
            let slot = self.slot(idx)?;
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n)?.prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(idx)?;
        slot.prev = None;
        slot.next = None;
        Ok(())
    }

    fn push_front(&mut self, idx: usize) -> SearchResult<()> {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx)?;
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slot_mut(h)?.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        Ok(())
    }

    fn evict_lru(&mut self) -> SearchResult<()> {
        let idx = self
            .tail
            .ok_or_else(|| SearchError::cache_corruption("over capacity with no tail"))?;
        self.unlink(idx)?;
        let slot = self.slots[idx]
            .take()
            .ok_or_else(|| SearchError::cache_corruption(format!("slot {} is vacant", idx)))?;
        self.index.remove(&slot.key);
        self.free.push(idx);
        trace!("Evicted cached query {:?}", slot.key.term);
        Ok(())
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used
    fn keys(&self) -> SearchResult<Vec<QueryKey>> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let slot = self.slot(idx)?;
            keys.push(slot.key.clone());
            cursor = slot.next;
            if keys.len() > self.len() {
                return Err(SearchError::cache_corruption("cycle in recency list"));
            }
        }
        Ok(keys)
    }
}

/// Bounded LRU cache of completed searches, safe to share across threads
#[derive(Debug)]
pub struct ResultCache {
    lru: Mutex<LruList>,
    in_flight: DashMap<QueryKey, Arc<OnceCell<Arc<CachedSearch>>>>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruList::new(capacity.max(1))),
            in_flight: DashMap::new(),
        }
    }

    fn lock(&self) -> SearchResult<MutexGuard<'_, LruList>> {
        self.lru
            .lock()
            .map_err(|_| SearchError::cache_corruption("cache lock poisoned"))
    }

    /// Looks up `key`, marking it most recently used on a hit
    pub fn get(&self, key: &QueryKey) -> SearchResult<Option<Arc<CachedSearch>>> {
        self.lock()?.get(key)
    }

    pub fn insert(&self, key: QueryKey, value: Arc<CachedSearch>) -> SearchResult<()> {
        self.lock()?.insert(key, value)
    }

    /// Returns the cached result for `key`, or runs `compute` and caches its
    /// result. The flag is true when `compute` was not called by this caller.
    ///
    /// Only one computation per key is in flight at a time; concurrent callers
    /// with the same key wait for it. Errors from `compute` are returned and
    /// nothing is cached.
    pub fn get_or_compute<F>(
        &self,
        key: &QueryKey,
        compute: F,
    ) -> SearchResult<(Arc<CachedSearch>, bool)>
    where
        F: FnOnce() -> SearchResult<CachedSearch>,
    {
        if let Some(hit) = self.get(key)? {
            debug!("Cache hit for {:?}", key.term);
            return Ok((hit, true));
        }

        let cell = Arc::clone(
            &self
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut computed = false;
        let result: SearchResult<&Arc<CachedSearch>> = cell.get_or_try_init(|| {
            // Another caller may have finished between the lookup and here
            if let Some(hit) = self.get(key)? {
                return Ok(hit);
            }
            computed = true;
            debug!("Cache miss for {:?}", key.term);
            let value = Arc::new(compute()?);
            if value.is_cacheable() {
                self.insert(key.clone(), Arc::clone(&value))?;
            }
            Ok(value)
        });
        self.in_flight.remove_if(key, |_, c| Arc::ptr_eq(c, &cell));

        let value = Arc::clone(result?);
        Ok((value, !computed))
    }

    pub fn clear(&self) -> SearchResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|lru| lru.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys from most to least recently used
    pub fn keys(&self) -> SearchResult<Vec<QueryKey>> {
        self.lock()?.keys()
    }
}
