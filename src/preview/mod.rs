//! Page preview loading: bounded cache, per-key render gates, worker pool

mod backend;
mod cache;
mod gate;
mod loader;
mod request;
mod session;
mod state;
mod types;
mod worker;

pub use backend::{PageSource, RenderBackend};
pub use cache::{CacheKey, PageCache, capacity_for_radius};
pub use gate::{GateGuard, KeyedGate};
pub use loader::{Completion, LoaderConfig, LoaderStats, PreviewLoader};
pub use request::{RenderFault, RenderRequest, RenderResponse, RequestId};
pub use session::ViewerSession;
pub use state::{Command, Effect, ViewerState};
pub use types::*;

/// Pages preloaded on each side of the focal page
pub const DEFAULT_PRELOAD_RADIUS: usize = 1;
/// Render worker threads
pub const DEFAULT_WORKERS: usize = 4;
