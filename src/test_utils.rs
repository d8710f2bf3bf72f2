//! Backends and documents for exercising the loader in tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::preview::{
    Bitmap, DocumentId, PageHandle, PageSource, RenderBackend, RenderFault, RenderSize,
};

/// Document with `page_count` pages and a fixed id
#[derive(Clone, Debug)]
pub struct TestDocument {
    pub id: DocumentId,
    pub page_count: usize,
}

impl TestDocument {
    pub fn new(page_count: usize) -> Self {
        Self {
            id: DocumentId(42),
            page_count,
        }
    }
}

impl PageSource for TestDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn page_count(&self) -> usize {
        self.page_count
    }
}

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    in_render: AtomicUsize,
    max_in_render: AtomicUsize,
    rendered: Mutex<Vec<(PageHandle, RenderSize)>>,
    failing: Mutex<HashSet<usize>>,
}

/// Backend that renders solid bitmaps of the requested size and records every call.
///
/// Clones share their counters, so a test keeps one clone and hands the other
/// to the loader.
#[derive(Clone, Default)]
pub struct CountingBackend {
    delay: Duration,
    counters: Arc<Counters>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every render
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make renders of page `index` fail until [`heal`](Self::heal) is called
    pub fn fail_page(&self, index: usize) {
        self.counters
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index);
    }

    pub fn heal(&self, index: usize) {
        self.counters
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }

    /// Total render calls
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Render calls for one (page, size) pair
    pub fn calls_for(&self, index: usize, size: RenderSize) -> usize {
        self.counters
            .rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(page, s)| page.index == index && *s == size)
            .count()
    }

    /// Page indices rendered so far, in call order
    pub fn rendered_pages(&self) -> Vec<usize> {
        self.counters
            .rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(page, _)| page.index)
            .collect()
    }

    /// Highest number of renders observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_in_render.load(Ordering::SeqCst)
    }
}

impl RenderBackend for CountingBackend {
    fn render(&self, page: &PageHandle, size: RenderSize) -> Result<Bitmap, RenderFault> {
        let c = &self.counters;
        c.calls.fetch_add(1, Ordering::SeqCst);
        c.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*page, size));

        let now = c.in_render.fetch_add(1, Ordering::SeqCst) + 1;
        c.max_in_render.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        c.in_render.fetch_sub(1, Ordering::SeqCst);

        let failing = c
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&page.index);
        if failing {
            return Err(RenderFault::backend(format!("page {} is corrupt", page.index)));
        }

        let shade = (page.index % 256) as u8;
        let mut bitmap = Bitmap::blank(size.width, size.height);
        bitmap.pixels.fill(shade);
        Ok(bitmap)
    }
}
