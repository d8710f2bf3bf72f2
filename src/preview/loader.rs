//! Preview loader - owns the cache, the gate table and the worker pool

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use serde::Serialize;

use super::backend::{PageSource, RenderBackend};
use super::cache::{CacheKey, PageCache, capacity_for_radius};
use super::gate::KeyedGate;
use super::request::{RenderRequest, RenderResponse, RequestId};
use super::types::{PageHandle, Preview, RenderSize};
use super::worker::{Shared, render_worker};
use super::{DEFAULT_PRELOAD_RADIUS, DEFAULT_WORKERS};

/// Completion for one request: receives the page asked for and the final preview
pub type Completion = Box<dyn FnOnce(PageHandle, Option<Preview>)>;

/// Loader tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Pages preloaded on each side of the focal page
    pub preload_radius: usize,
    /// Render worker threads
    pub workers: usize,
    /// Fixed cache capacity; derived from the radius when `None`
    pub capacity: Option<usize>,
    /// Drop all cached previews when the host goes to the background
    pub clear_cache_on_background: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            preload_radius: DEFAULT_PRELOAD_RADIUS,
            workers: DEFAULT_WORKERS,
            capacity: None,
            clear_cache_on_background: false,
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        self.capacity
            .unwrap_or_else(|| capacity_for_radius(self.preload_radius))
    }
}

/// Counters describing what the loader has done so far
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub requests: usize,
    pub hits: usize,
    pub stale_serves: usize,
    pub misses: usize,
    pub preloads: usize,
    pub renders: usize,
    pub coalesced: usize,
    pub failures: usize,
    pub evictions: usize,
    pub unconfigured: usize,
    pub skipped: usize,
}

/// One render on its way through the pool, with everyone waiting on it
struct InFlight {
    id: RequestId,
    completions: Vec<Completion>,
}

/// Loads page previews on demand and keeps the neighbourhood of the focal
/// page warm.
///
/// All methods run on the control thread. Rendering happens on worker threads;
/// results come back through [`PreviewLoader::poll_responses`], which runs the
/// completions on the caller's thread.
pub struct PreviewLoader<S: PageSource, B: RenderBackend> {
    source: S,
    shared: Arc<Shared<B>>,
    request_tx: Sender<RenderRequest>,
    response_rx: Receiver<RenderResponse>,
    target_size: RenderSize,
    preload_radius: usize,
    fixed_capacity: Option<usize>,
    clear_cache_on_background: bool,
    next_request_id: u64,
    in_flight: HashMap<CacheKey, InFlight>,
    num_workers: usize,
    stats: LoaderStats,
}

impl<S: PageSource, B: RenderBackend> PreviewLoader<S, B> {
    /// Create a loader with default configuration
    #[must_use]
    pub fn new(source: S, backend: B) -> Self {
        Self::with_config(source, backend, LoaderConfig::default())
    }

    /// Create a loader with custom configuration
    #[must_use]
    pub fn with_config(source: S, backend: B, config: LoaderConfig) -> Self {
        let shared = Arc::new(Shared {
            backend,
            cache: Mutex::new(PageCache::new(config.effective_capacity())),
            gates: KeyedGate::new(),
        });

        // Workers pull from one shared queue, so the receiver must be cloneable (MPMC).
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let num_workers = config.workers.max(1);
        for n in 0..num_workers {
            let shared = Arc::clone(&shared);
            let rx = request_rx.clone();
            let tx = response_tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("preview-render-{n}"))
                .spawn(move || render_worker(shared, rx, tx));
            if let Err(e) = spawned {
                log::error!("Failed to spawn render worker {n}: {e}");
            }
        }

        log::info!(
            "preview loader for document {:?}: {} pages, {} workers, capacity {}",
            source.id(),
            source.page_count(),
            num_workers,
            config.effective_capacity()
        );

        Self {
            source,
            shared,
            request_tx,
            response_rx,
            target_size: RenderSize::ZERO,
            preload_radius: config.preload_radius,
            fixed_capacity: config.capacity,
            clear_cache_on_background: config.clear_cache_on_background,
            next_request_id: 1,
            in_flight: HashMap::new(),
            num_workers,
            stats: LoaderStats::default(),
        }
    }

    /// Document this loader serves
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolve a 1-based page index through the document model
    #[must_use]
    pub fn page(&self, index: usize) -> Option<PageHandle> {
        self.source.page(index)
    }

    /// Set the size all later requests render at.
    ///
    /// Entries cached for other sizes stay put; they are no longer reachable as
    /// fresh hits and age out through LRU.
    pub fn set_target_size(&mut self, size: RenderSize) {
        if self.target_size != size {
            log::debug!("target size {} -> {}", self.target_size, size);
            self.target_size = size;
        }
    }

    #[must_use]
    pub fn target_size(&self) -> RenderSize {
        self.target_size
    }

    /// Ask for the preview of `page` at the current target size.
    ///
    /// Returns what can be shown right now: the fresh bitmap on a hit, or the
    /// newest bitmap of this page at some other size while the fresh one is
    /// rendered. `on_ready` receives the final answer; it runs before this
    /// returns on a hit or when no target size is set, and from
    /// [`poll_responses`](Self::poll_responses) otherwise. Deliveries are never
    /// filtered: the receiver compares the page against what it displays.
    pub fn request<F>(&mut self, page: PageHandle, on_ready: F) -> Option<Preview>
    where
        F: FnOnce(PageHandle, Option<Preview>) + 'static,
    {
        self.stats.requests += 1;
        let size = self.target_size;
        if size.is_unset() {
            self.stats.unconfigured += 1;
            log::debug!("page {} requested before a target size was set", page.index);
            on_ready(page, None);
            return None;
        }

        let key = CacheKey::new(page, size);
        let (fresh, stale) = {
            let mut cache = self.shared.lock_cache();
            match cache.get(&key) {
                Some(bitmap) => (Some(bitmap), None),
                None => (None, cache.peek_any_size(&page)),
            }
        };

        if let Some(bitmap) = fresh {
            self.stats.hits += 1;
            let preview = Preview { page, size, bitmap };
            on_ready(page, Some(preview.clone()));
            return Some(preview);
        }

        if let Some(stale) = &stale {
            self.stats.stale_serves += 1;
            log::debug!(
                "serving page {} at {} while {} renders",
                page.index,
                stale.size,
                size
            );
        } else {
            self.stats.misses += 1;
        }

        match self.in_flight.get_mut(&key) {
            Some(flight) => {
                self.stats.coalesced += 1;
                flight.completions.push(Box::new(on_ready));
            }
            None => self.dispatch(key, vec![Box::new(on_ready)]),
        }
        stale
    }

    /// [`request`](Self::request) by 1-based index; out-of-range indices are skipped
    pub fn request_index<F>(&mut self, index: usize, on_ready: F) -> Option<Preview>
    where
        F: FnOnce(PageHandle, Option<Preview>) + 'static,
    {
        match self.source.page(index) {
            Some(page) => self.request(page, on_ready),
            None => {
                self.stats.skipped += 1;
                None
            }
        }
    }

    /// Warm the cache for `radius` pages on each side of `around`.
    ///
    /// Pages outside the document are skipped, as are pages already cached or
    /// already being rendered. Returns the number of renders scheduled.
    pub fn preload(&mut self, around: usize, radius: usize) -> usize {
        if self.target_size.is_unset() {
            return 0;
        }

        let mut scheduled = 0;
        for offset in 1..=radius {
            for index in [around.checked_add(offset), around.checked_sub(offset)] {
                let page = index.and_then(|i| self.source.page(i));
                match page {
                    Some(page) => {
                        if self.preload_page(page) {
                            scheduled += 1;
                        }
                    }
                    None => self.stats.skipped += 1,
                }
            }
        }
        scheduled
    }

    /// [`preload`](Self::preload) with the configured radius
    pub fn preload_around(&mut self, around: usize) -> usize {
        self.preload(around, self.preload_radius)
    }

    fn preload_page(&mut self, page: PageHandle) -> bool {
        let key = CacheKey::new(page, self.target_size);
        if self.in_flight.contains_key(&key) {
            return false;
        }
        // Touch cached neighbours so they outlive pages outside the window.
        if self.shared.lock_cache().get(&key).is_some() {
            return false;
        }

        self.stats.preloads += 1;
        self.dispatch(key, Vec::new());
        true
    }

    /// Send one render for `key` to the pool. Callers check `in_flight` first,
    /// so the pool never sees two requests for the same key from this loader.
    fn dispatch(&mut self, key: CacheKey, completions: Vec<Completion>) {
        let id = self.next_id();
        let request = if completions.is_empty() {
            RenderRequest::Preload { id, key }
        } else {
            RenderRequest::Page { id, key }
        };

        if self.request_tx.send(request).is_ok() {
            self.in_flight.insert(key, InFlight { id, completions });
        } else {
            log::warn!("render workers are gone; page {} not rendered", key.page.index);
            for completion in completions {
                completion(key.page, None);
            }
        }
    }

    /// Deliver every finished render, running completions on this thread
    pub fn poll_responses(&mut self) -> usize {
        self.deliver_all(None)
    }

    /// Wait up to `timeout` for at least one finished render, then deliver all
    pub fn wait_responses(&mut self, timeout: Duration) -> usize {
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => self.deliver_all(Some(response)),
            Err(_) => 0,
        }
    }

    fn deliver_all(&mut self, first: Option<RenderResponse>) -> usize {
        let mut delivered = 0;
        if let Some(response) = first {
            self.complete(response);
            delivered += 1;
        }
        while let Ok(response) = self.response_rx.try_recv() {
            self.complete(response);
            delivered += 1;
        }
        if delivered > 0 {
            self.prune_gates();
        }
        delivered
    }

    /// Drop idle gates of keys no longer cached.
    ///
    /// Eviction already forgets most of them; this catches gates that were
    /// still held at the moment their entry was evicted.
    fn prune_gates(&self) {
        let capacity = self.shared.lock_cache().capacity();
        if self.shared.gates.len() <= capacity {
            return;
        }
        let cached: HashSet<CacheKey> = self.shared.lock_cache().keys();
        let pruned = self.shared.gates.retain_idle(|key| cached.contains(key));
        log::trace!("pruned {pruned} idle gates");
    }

    /// Deliver responses until nothing is pending. False on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.wait_responses(remaining);
        }
        true
    }

    fn complete(&mut self, response: RenderResponse) {
        let key = *response.key();
        let completions = match self.in_flight.get(&key) {
            Some(flight) if flight.id == response.id() => self
                .in_flight
                .remove(&key)
                .map(|flight| flight.completions)
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let preview = match response {
            RenderResponse::Page {
                bitmap,
                rendered,
                evicted,
                ..
            } => {
                if rendered {
                    self.stats.renders += 1;
                } else {
                    self.stats.coalesced += 1;
                }
                self.stats.evictions += evicted;
                if key.size != self.target_size {
                    log::debug!(
                        "page {} finished at {} but target is now {}",
                        key.page.index,
                        key.size,
                        self.target_size
                    );
                }
                Some(Preview {
                    page: key.page,
                    size: key.size,
                    bitmap,
                })
            }
            RenderResponse::Error { error, .. } => {
                self.stats.failures += 1;
                log::warn!(
                    "render failed for page {} at {}: {error}",
                    key.page.index,
                    key.size
                );
                None
            }
        };

        for completion in completions {
            completion(key.page, preview.clone());
        }
    }

    /// Fresh preview of `page` at the current size, if cached
    #[must_use]
    pub fn cached(&self, page: PageHandle) -> Option<Preview> {
        let size = self.target_size;
        let key = CacheKey::new(page, size);
        self.shared
            .lock_cache()
            .get(&key)
            .map(|bitmap| Preview { page, size, bitmap })
    }

    /// Check if a page is cached at the current size, without touching recency
    #[must_use]
    pub fn is_cached(&self, page: PageHandle) -> bool {
        self.shared
            .lock_cache()
            .contains(&CacheKey::new(page, self.target_size))
    }

    #[must_use]
    pub fn preload_radius(&self) -> usize {
        self.preload_radius
    }

    /// Change the preload radius; the capacity follows unless it was fixed
    pub fn set_preload_radius(&mut self, radius: usize) {
        self.preload_radius = radius;
        if self.fixed_capacity.is_none() {
            self.resize_cache(capacity_for_radius(radius));
        }
    }

    /// Pin the cache capacity, independent of the preload radius
    pub fn set_capacity(&mut self, capacity: usize) {
        self.fixed_capacity = Some(capacity);
        self.resize_cache(capacity);
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.lock_cache().capacity()
    }

    fn resize_cache(&mut self, capacity: usize) {
        let evicted = self.shared.lock_cache().resize(capacity);
        self.stats.evictions += evicted.len();
        self.shared.forget_gates(&evicted);
    }

    pub fn set_clear_cache_on_background(&mut self, clear: bool) {
        self.clear_cache_on_background = clear;
    }

    /// Host app is being suspended. Returns the number of previews dropped.
    pub fn enter_background(&mut self) -> usize {
        if !self.clear_cache_on_background {
            return 0;
        }
        let dropped = self.shared.lock_cache().invalidate_all();
        self.shared.forget_gates(&dropped);
        log::info!("released {} cached previews", dropped.len());
        dropped.len()
    }

    /// Drop every cached size of `page`, e.g. after its content changed
    pub fn invalidate_page(&mut self, page: PageHandle) -> usize {
        let dropped = self.shared.lock_cache().invalidate_page(&page);
        self.shared.forget_gates(&dropped);
        dropped.len()
    }

    /// Bytes held by cached bitmaps
    #[must_use]
    pub fn cache_bytes(&self) -> usize {
        self.shared.lock_cache().byte_len()
    }

    /// Number of cached previews
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.shared.lock_cache().len()
    }

    /// Number of per-key gates alive
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.shared.gates.len()
    }

    /// Renders dispatched but not yet delivered, one per key
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    /// Shutdown all workers
    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl<S: PageSource, B: RenderBackend> Drop for PreviewLoader<S, B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
