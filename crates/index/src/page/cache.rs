//! Page cache for committed page images.
//!
//! Every storage file owns one cache. Only committed pages enter it: writes
//! are buffered in the atomic operation until commit, so a cached page never
//! carries uncommitted changes and can be evicted at any time.
//! Uses clock eviction (approximate LRU) for low overhead.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};

use super::Page;
use crate::error::PageId;

/// Page cache with clock eviction.
///
/// Tracks hit/miss counters for observability.
pub struct PageCache {
    /// Cached pages.
    pages: RwLock<HashMap<PageId, CacheEntry>>,
    /// Maximum number of pages to cache.
    capacity: usize,
    /// Clock state: ring of cached page ids plus the hand position.
    clock: Mutex<Clock>,
    /// Total cache hits since creation.
    hits: AtomicU64,
    /// Total cache misses since creation.
    misses: AtomicU64,
}

struct Clock {
    ring: Vec<PageId>,
    hand: usize,
}

/// Cache entry with access tracking.
struct CacheEntry {
    page: Page,
    /// Whether page was accessed since last clock sweep (second chance).
    accessed: bool,
}

impl PageCache {
    /// Creates a new cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: RwLock::new(HashMap::with_capacity(capacity)),
            capacity: capacity.max(1),
            clock: Mutex::new(Clock { ring: Vec::with_capacity(capacity), hand: 0 }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a copy of the cached page, or `None` if not present.
    pub fn get(&self, page_id: PageId) -> Option<Page> {
        let mut pages = self.pages.write();
        if let Some(entry) = pages.get_mut(&page_id) {
            entry.accessed = true;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.page.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts or replaces a committed page image.
    pub fn insert(&self, mut page: Page) {
        page.dirty = false;
        let page_id = page.id;
        let mut pages = self.pages.write();

        if let Some(entry) = pages.get_mut(&page_id) {
            entry.page = page;
            entry.accessed = true;
            return;
        }

        let mut clock = self.clock.lock();
        while pages.len() >= self.capacity && Self::evict_one(&mut pages, &mut clock) {}

        clock.ring.push(page_id);
        pages.insert(page_id, CacheEntry { page, accessed: true });
    }

    /// Removes a page from the cache.
    pub fn remove(&self, page_id: PageId) -> Option<Page> {
        let mut pages = self.pages.write();
        let mut clock = self.clock.lock();

        let entry = pages.remove(&page_id)?;
        clock.ring.retain(|&id| id != page_id);
        if clock.hand >= clock.ring.len() {
            clock.hand = 0;
        }
        Some(entry.page)
    }

    /// Evicts one page using the clock algorithm.
    ///
    /// Returns false only when there is nothing left to evict.
    fn evict_one(pages: &mut HashMap<PageId, CacheEntry>, clock: &mut Clock) -> bool {
        // At most two sweeps: the first clears access bits, the second evicts.
        let max_iterations = clock.ring.len() * 2 + 1;

        for _ in 0..max_iterations {
            if clock.ring.is_empty() {
                return false;
            }
            if clock.hand >= clock.ring.len() {
                clock.hand = 0;
            }

            let page_id = clock.ring[clock.hand];
            match pages.get_mut(&page_id) {
                Some(entry) if entry.accessed => {
                    entry.accessed = false;
                    clock.hand += 1;
                },
                Some(_) | None => {
                    pages.remove(&page_id);
                    clock.ring.remove(clock.hand);
                    return true;
                },
            }
        }

        false
    }

    /// Clears all cached pages.
    pub fn clear(&self) {
        let mut pages = self.pages.write();
        let mut clock = self.clock.lock();
        pages.clear();
        clock.ring.clear();
        clock.hand = 0;
    }

    /// Returns the number of cached pages.
    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    /// Checks if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    /// Checks if a page is in the cache.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.read().contains_key(&page_id)
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of cached pages.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}
