//! Preview render worker - runs in separate thread(s)

use std::sync::{Arc, Mutex, PoisonError};

use flume::{Receiver, Sender};

use super::backend::RenderBackend;
use super::cache::{CacheKey, PageCache};
use super::gate::KeyedGate;
use super::request::{RenderFault, RenderRequest, RenderResponse, RequestId};

/// State shared between the loader and its workers
pub(crate) struct Shared<B> {
    pub backend: B,
    pub cache: Mutex<PageCache>,
    pub gates: KeyedGate<CacheKey>,
}

impl<B> Shared<B> {
    pub fn lock_cache(&self) -> std::sync::MutexGuard<'_, PageCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop gates that belonged to evicted entries
    pub fn forget_gates(&self, evicted: &[CacheKey]) {
        for key in evicted {
            self.gates.forget(key);
        }
    }
}

/// Main worker function - runs in a dedicated thread
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub(crate) fn render_worker<B: RenderBackend>(
    shared: Arc<Shared<B>>,
    requests: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
) {
    for request in requests {
        match request {
            RenderRequest::Page { id, key } | RenderRequest::Preload { id, key } => {
                handle_page_request(&shared, id, key, &responses);
            }

            RenderRequest::Shutdown => break,
        }
    }
    log::trace!("render worker exiting");
}

fn handle_page_request<B: RenderBackend>(
    shared: &Shared<B>,
    id: RequestId,
    key: CacheKey,
    responses: &Sender<RenderResponse>,
) {
    log::trace!("waiting on gate for page {} at {}", key.page.index, key.size);
    let held = shared.gates.acquire(&key);

    // Another worker may have finished this key while we waited.
    let cached = shared.lock_cache().get(&key);
    if let Some(bitmap) = cached {
        drop(held);
        let _ = responses.send(RenderResponse::Page {
            id,
            key,
            bitmap,
            rendered: false,
            evicted: 0,
        });
        return;
    }

    let response = match render_checked(&shared.backend, &key) {
        Ok(bitmap) => {
            let bitmap = Arc::new(bitmap);
            let evicted = shared.lock_cache().insert(key, Arc::clone(&bitmap));
            shared.forget_gates(&evicted);
            log::debug!(
                "rendered page {} at {} ({} evicted)",
                key.page.index,
                key.size,
                evicted.len()
            );
            RenderResponse::Page {
                id,
                key,
                bitmap,
                rendered: true,
                evicted: evicted.len(),
            }
        }
        Err(error) => RenderResponse::Error { id, key, error },
    };

    // The entry is stored before the gate opens, so waiters find it.
    drop(held);
    let _ = responses.send(response);
}

fn render_checked<B: RenderBackend>(
    backend: &B,
    key: &CacheKey,
) -> Result<super::types::Bitmap, RenderFault> {
    let bitmap = backend.render(&key.page, key.size)?;
    if bitmap.is_empty() {
        return Err(RenderFault::EmptyRaster);
    }
    Ok(bitmap)
}
