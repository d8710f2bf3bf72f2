//! In-process document and rasterizer.
//!
//! Stands in for a real PDF engine: pages have a fixed natural size and render
//! to a recognisable pattern (a page-specific tint plus a band whose position
//! encodes the page number), so output can be checked by eye or by test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rayon::prelude::*;

use crate::preview::{
    Bitmap, DocumentId, PageHandle, PageSize, PageSource, RenderBackend, RenderFault, RenderSize,
};

/// US Letter in points
pub const LETTER: PageSize = PageSize::new(612.0, 792.0);

/// A document of identical pages
#[derive(Clone, Debug)]
pub struct SyntheticDocument {
    id: DocumentId,
    name: String,
    page_count: usize,
    page_size: PageSize,
}

impl SyntheticDocument {
    #[must_use]
    pub fn new(name: impl Into<String>, page_count: usize, page_size: PageSize) -> Self {
        let name = name.into();
        Self {
            id: DocumentId::from_bytes(name.as_bytes()),
            name,
            page_count,
            page_size,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PageSource for SyntheticDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, index: usize) -> Option<PageSize> {
        (1..=self.page_count)
            .contains(&index)
            .then_some(self.page_size)
    }
}

/// Rasterizer for [`SyntheticDocument`] pages
pub struct SyntheticRenderer {
    document: DocumentId,
    page_count: usize,
    page_size: PageSize,
    delay: Duration,
    renders: AtomicUsize,
}

impl SyntheticRenderer {
    #[must_use]
    pub fn for_document(document: &SyntheticDocument) -> Self {
        Self {
            document: document.id,
            page_count: document.page_count,
            page_size: document.page_size,
            delay: Duration::ZERO,
            renders: AtomicUsize::new(0),
        }
    }

    /// Simulate a slow engine
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Completed renders
    #[must_use]
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }
}

impl RenderBackend for SyntheticRenderer {
    fn render(&self, page: &PageHandle, size: RenderSize) -> Result<Bitmap, RenderFault> {
        if page.document != self.document {
            return Err(RenderFault::backend(format!(
                "page belongs to document {:?}, renderer serves {:?}",
                page.document, self.document
            )));
        }
        if !(1..=self.page_count).contains(&page.index) {
            return Err(RenderFault::PageOutOfRange { index: page.index });
        }

        let raster = self.page_size.fit_within(size);
        if raster.is_unset() {
            return Err(RenderFault::EmptyRaster);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let bitmap = paint(page.index, self.page_count, raster);
        self.renders.fetch_add(1, Ordering::Relaxed);
        Ok(bitmap)
    }
}

fn paint(index: usize, page_count: usize, size: RenderSize) -> Bitmap {
    let mut bitmap = Bitmap::blank(size.width, size.height);
    let row_len = size.width as usize * Bitmap::BYTES_PER_PIXEL;
    let height = size.height as usize;

    let tint = page_tint(index);
    let band_height = (height / 12).max(1);
    let span = page_count.saturating_sub(1).max(1);
    let band_top = (height - band_height) * (index - 1).min(span) / span;
    let band = band_top..band_top + band_height;

    bitmap
        .pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let color = if band.contains(&y) {
                [0x20, 0x20, 0x20]
            } else {
                // Slight vertical gradient so rows are distinguishable
                let fade = (y * 32 / height.max(1)) as u8;
                [
                    tint[0].saturating_sub(fade),
                    tint[1].saturating_sub(fade),
                    tint[2].saturating_sub(fade),
                ]
            };
            for px in row.chunks_exact_mut(Bitmap::BYTES_PER_PIXEL) {
                px.copy_from_slice(&color);
            }
        });

    bitmap
}

fn page_tint(index: usize) -> [u8; 3] {
    let i = index as u32;
    [
        0xC0 + (i.wrapping_mul(37) % 0x40) as u8,
        0xC0 + (i.wrapping_mul(61) % 0x40) as u8,
        0xC0 + (i.wrapping_mul(89) % 0x40) as u8,
    ]
}
