//! Bounded, single-flight preview cache for paged document viewers.
//!
//! [`preview::PreviewLoader`] renders page bitmaps on worker threads, keeps the
//! most recently used ones in a fixed-size cache, preloads the pages around the
//! one being viewed, and never renders the same (page, size) pair twice at once.

pub mod panic_handler;
pub mod preview;
pub mod settings;
pub mod synthetic;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use preview::{
    Bitmap, LoaderConfig, PageHandle, PageSource, Preview, PreviewLoader, RenderBackend,
    RenderSize, ViewerSession,
};
pub use settings::Settings;
