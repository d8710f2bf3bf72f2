//! LRU cache for rendered page previews

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::types::{Bitmap, PageHandle, Preview, RenderSize};

/// Cache key for rendered previews
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub page: PageHandle,
    pub size: RenderSize,
}

impl CacheKey {
    #[must_use]
    pub const fn new(page: PageHandle, size: RenderSize) -> Self {
        Self { page, size }
    }
}

/// Number of entries needed so the whole preload window around a focal page
/// stays resident while the window itself is being filled.
#[must_use]
pub const fn capacity_for_radius(radius: usize) -> usize {
    1 + 2 * (radius + 1)
}

/// LRU cache for rendered previews
pub struct PageCache {
    cache: LruCache<CacheKey, Arc<Bitmap>>,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(non_zero(capacity)),
        }
    }

    /// Get a cached preview, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Bitmap>> {
        self.cache.get(key).cloned()
    }

    /// Check if a key is in the cache without promoting it
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Most recently used preview of `page` at any size, without promoting it
    #[must_use]
    pub fn peek_any_size(&self, page: &PageHandle) -> Option<Preview> {
        self.cache
            .iter()
            .find(|(k, _)| k.page == *page)
            .map(|(k, bitmap)| Preview {
                page: k.page,
                size: k.size,
                bitmap: Arc::clone(bitmap),
            })
    }

    /// Insert a preview, returning the keys evicted to make room
    pub fn insert(&mut self, key: CacheKey, bitmap: Arc<Bitmap>) -> Vec<CacheKey> {
        match self.cache.push(key, bitmap) {
            Some((old, _)) if old != key => vec![old],
            _ => Vec::new(),
        }
    }

    /// Change the capacity, returning the keys evicted to fit
    pub fn resize(&mut self, capacity: usize) -> Vec<CacheKey> {
        let capacity = non_zero(capacity);
        let mut evicted = Vec::new();
        while self.cache.len() > capacity.get() {
            match self.cache.pop_lru() {
                Some((key, _)) => evicted.push(key),
                None => break,
            }
        }
        self.cache.resize(capacity);
        evicted
    }

    /// Clear all cached previews
    pub fn invalidate_all(&mut self) -> Vec<CacheKey> {
        let keys: Vec<_> = self.cache.iter().map(|(k, _)| *k).collect();
        self.cache.clear();
        keys
    }

    /// Invalidate all cached sizes of a specific page
    pub fn invalidate_page(&mut self, page: &PageHandle) -> Vec<CacheKey> {
        let keys_to_remove: Vec<_> = self
            .cache
            .iter()
            .filter(|(k, _)| k.page == *page)
            .map(|(k, _)| *k)
            .collect();

        for key in &keys_to_remove {
            self.cache.pop(key);
        }
        keys_to_remove
    }

    /// Snapshot of the cached keys
    #[must_use]
    pub fn keys(&self) -> HashSet<CacheKey> {
        self.cache.iter().map(|(k, _)| *k).collect()
    }

    /// Number of cached previews
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Total bytes held by cached bitmaps
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.cache.iter().map(|(_, b)| b.byte_len()).sum()
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::super::types::DocumentId;
    use super::*;

    const DOC: DocumentId = DocumentId(7);
    const SIZE: RenderSize = RenderSize::new(100, 50);

    fn key(page: usize) -> CacheKey {
        CacheKey::new(PageHandle::new(DOC, page), SIZE)
    }

    fn bitmap() -> Arc<Bitmap> {
        Arc::new(Bitmap::blank(10, 10))
    }

    #[test]
    fn capacity_covers_preload_window() {
        assert_eq!(capacity_for_radius(0), 3);
        assert_eq!(capacity_for_radius(1), 5);
        assert_eq!(capacity_for_radius(2), 7);
    }

    #[test]
    fn cache_insert_and_get() {
        let mut cache = PageCache::new(10);
        cache.insert(key(1), bitmap());

        assert!(cache.contains(&key(1)));
        assert!(cache.get(&key(1)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_lru_eviction() {
        let mut cache = PageCache::new(2);

        let mut evicted = Vec::new();
        for i in 1..=3 {
            evicted.extend(cache.insert(key(i), bitmap()));
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(evicted, vec![key(1)]);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = PageCache::new(3);
        cache.insert(key(1), bitmap());
        cache.insert(key(2), bitmap());
        cache.insert(key(3), bitmap());

        assert!(cache.get(&key(1)).is_some());
        let evicted = cache.insert(key(4), bitmap());

        assert_eq!(evicted, vec![key(2)]);
        assert!(cache.contains(&key(1)));
    }

    #[test]
    fn reinserting_same_key_evicts_nothing() {
        let mut cache = PageCache::new(1);
        cache.insert(key(1), bitmap());
        assert!(cache.insert(key(1), bitmap()).is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn peek_any_size_prefers_most_recent() {
        let mut cache = PageCache::new(10);
        let small = CacheKey::new(PageHandle::new(DOC, 1), RenderSize::new(10, 10));
        let large = CacheKey::new(PageHandle::new(DOC, 1), RenderSize::new(20, 20));
        cache.insert(small, bitmap());
        cache.insert(large, bitmap());

        let found = cache.peek_any_size(&PageHandle::new(DOC, 1));
        assert_eq!(found.map(|p| p.size), Some(large.size));
        assert!(cache.peek_any_size(&PageHandle::new(DOC, 2)).is_none());
    }

    #[test]
    fn resize_evicts_oldest() {
        let mut cache = PageCache::new(5);
        for i in 1..=5 {
            cache.insert(key(i), bitmap());
        }

        let evicted = cache.resize(3);
        assert_eq!(evicted, vec![key(1), key(2)]);
        assert_eq!(cache.capacity(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn cache_invalidate_all() {
        let mut cache = PageCache::new(10);
        for i in 1..=5 {
            cache.insert(key(i), bitmap());
        }

        assert_eq!(cache.invalidate_all().len(), 5);
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_invalidate_page() {
        let mut cache = PageCache::new(10);
        let other_size = CacheKey::new(PageHandle::new(DOC, 1), RenderSize::new(1, 1));
        cache.insert(key(1), bitmap());
        cache.insert(other_size, bitmap());
        cache.insert(key(2), bitmap());

        assert_eq!(cache.len(), 3);
        cache.invalidate_page(&PageHandle::new(DOC, 1));

        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(PageCache::new(0).capacity(), 1);
    }
}
