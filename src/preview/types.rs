//! Core types for page previews

use std::sync::Arc;

/// Stable identity of one open document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl DocumentId {
    /// Derive an id from arbitrary bytes (file path, content digest, name)
    #[must_use]
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let digest = md5::compute(bytes);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.0[..8]);
        Self(u64::from_le_bytes(head))
    }
}

/// One page of a document.
///
/// Identity is the pair (document, 1-based page index), so two handles for the
/// same page compare equal regardless of where they were obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub document: DocumentId,
    /// Page number (1-based)
    pub index: usize,
}

impl PageHandle {
    #[must_use]
    pub const fn new(document: DocumentId, index: usize) -> Self {
        Self { document, index }
    }
}

/// Target raster resolution in pixels.
///
/// Viewports report fractional sizes; they are rounded once here so equal
/// layouts always produce equal keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const ZERO: Self = Self::new(0, 0);

    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round a fractional viewport size to whole pixels
    #[must_use]
    pub fn from_viewport(width: f32, height: f32) -> Self {
        Self::new(round_px(width), round_px(height))
    }

    /// True when no real size has been set yet
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn round_px(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

/// Natural size of a page in document units (points)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Aspect-fit this page into `viewport`.
    ///
    /// The fitted raster never exceeds the page's own size, so small pages are
    /// not upscaled past 1:1.
    #[must_use]
    pub fn fit_within(self, viewport: RenderSize) -> RenderSize {
        if viewport.is_unset() || self.width <= 0.0 || self.height <= 0.0 {
            return RenderSize::ZERO;
        }

        let view_w = viewport.width as f32;
        let view_h = viewport.height as f32;
        let page_ratio = self.width / self.height;
        let view_ratio = view_w / view_h;

        let (mut width, mut height) = if page_ratio > view_ratio {
            (view_w, view_w / self.width * self.height)
        } else {
            (view_h / self.height * self.width, view_h)
        };

        if width > self.width {
            width = self.width;
            height = self.height;
        }

        RenderSize::new(round_px(width).max(1), round_px(height).max(1))
    }
}

/// Rasterized page image.
///
/// Raw RGB pixel data, 3 bytes per pixel, rows tightly packed.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// A white bitmap of the given size
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0xFF; width as usize * height as usize * Self::BYTES_PER_PIXEL],
        }
    }

    #[must_use]
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Convert into an `image` buffer for encoding
    #[must_use]
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish_non_exhaustive()
    }
}

/// A bitmap together with what it was rendered for
#[derive(Clone, Debug)]
pub struct Preview {
    pub page: PageHandle,
    /// Target size that was live when the render was scheduled
    pub size: RenderSize,
    pub bitmap: Arc<Bitmap>,
}

impl Preview {
    /// Whether this preview was produced for `size`
    #[must_use]
    pub fn matches(&self, page: PageHandle, size: RenderSize) -> bool {
        self.page == page && self.size == size
    }
}
