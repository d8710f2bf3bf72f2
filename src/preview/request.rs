//! Render request and response types

use std::sync::Arc;

use super::cache::CacheKey;
use super::types::Bitmap;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render a page someone is waiting on
    Page { id: RequestId, key: CacheKey },

    /// Warm the cache for a neighbouring page
    Preload { id: RequestId, key: CacheKey },

    /// Shutdown the worker
    Shutdown,
}

/// Errors from render backends
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[error("renderer produced an empty raster")]
    EmptyRaster,

    #[error("page {index} is out of range")]
    PageOutOfRange { index: usize },

    #[error("{detail}")]
    Backend { detail: String },
}

impl RenderFault {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// Bitmap is in the cache (`rendered` is false when another worker got there first)
    Page {
        id: RequestId,
        key: CacheKey,
        bitmap: Arc<Bitmap>,
        rendered: bool,
        evicted: usize,
    },

    /// Backend failed; nothing was cached
    Error {
        id: RequestId,
        key: CacheKey,
        error: RenderFault,
    },
}

impl RenderResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Page { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::Page { key, .. } | Self::Error { key, .. } => key,
        }
    }
}
