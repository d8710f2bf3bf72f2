//! Collaborators the loader consumes: the document model and the rasterizer

use super::request::RenderFault;
use super::types::{Bitmap, DocumentId, PageHandle, PageSize, RenderSize};

/// Produces a bitmap for one page at one target size.
///
/// Called from worker threads. Implementations must tolerate concurrent calls
/// for different pages; the loader guarantees that a given (page, size) pair is
/// never rendered twice at the same time.
pub trait RenderBackend: Send + Sync + 'static {
    fn render(&self, page: &PageHandle, size: RenderSize) -> Result<Bitmap, RenderFault>;
}

impl<F> RenderBackend for F
where
    F: Fn(&PageHandle, RenderSize) -> Result<Bitmap, RenderFault> + Send + Sync + 'static,
{
    fn render(&self, page: &PageHandle, size: RenderSize) -> Result<Bitmap, RenderFault> {
        self(page, size)
    }
}

/// Document model: page count and page lookup.
///
/// Page indices are 1-based; `page(0)` and `page(n)` for `n > page_count()`
/// yield `None`.
pub trait PageSource {
    fn id(&self) -> DocumentId;

    fn page_count(&self) -> usize;

    fn page(&self, index: usize) -> Option<PageHandle> {
        (1..=self.page_count())
            .contains(&index)
            .then(|| PageHandle::new(self.id(), index))
    }

    /// Natural page size, if the model knows it
    fn page_size(&self, _index: usize) -> Option<PageSize> {
        None
    }
}
