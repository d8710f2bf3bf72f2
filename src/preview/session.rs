//! Viewer session - drives a loader from viewer commands

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::backend::{PageSource, RenderBackend};
use super::loader::{LoaderConfig, PreviewLoader};
use super::state::{Command, Effect, ViewerState};
use super::types::{PageHandle, Preview, RenderSize};

#[derive(Default)]
struct Display {
    current: Option<PageHandle>,
    target: RenderSize,
    shown: Option<Preview>,
    discarded: usize,
}

impl Display {
    /// Accept a delivery only if it is for the page on screen and not a
    /// downgrade from a preview that already matches the target size.
    fn offer(&mut self, page: PageHandle, preview: Option<Preview>) {
        let Some(preview) = preview else {
            return;
        };
        if self.current != Some(page) {
            self.discarded += 1;
            return;
        }
        let showing_fresh = self
            .shown
            .as_ref()
            .is_some_and(|shown| shown.matches(page, self.target));
        if showing_fresh && preview.size != self.target {
            self.discarded += 1;
            return;
        }
        self.shown = Some(preview);
    }
}

/// One document open in a viewer.
///
/// Owns the loader for that document; dropping the session stops its workers
/// and frees its cache.
pub struct ViewerSession<S: PageSource, B: RenderBackend> {
    state: ViewerState,
    loader: PreviewLoader<S, B>,
    display: Rc<RefCell<Display>>,
}

impl<S: PageSource, B: RenderBackend> ViewerSession<S, B> {
    #[must_use]
    pub fn new(source: S, backend: B, config: LoaderConfig) -> Self {
        // The first page is shown once a viewport exists.
        let state = ViewerState::for_document(source.page_count(), config.preload_radius);
        Self {
            state,
            loader: PreviewLoader::with_config(source, backend, config),
            display: Rc::default(),
        }
    }

    /// Get current viewer state
    #[must_use]
    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    #[must_use]
    pub fn loader(&self) -> &PreviewLoader<S, B> {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut PreviewLoader<S, B> {
        &mut self.loader
    }

    /// Apply a command to the viewer state
    pub fn apply_command(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SetTargetSize(size) => {
                    self.loader.set_target_size(size);
                    self.display.borrow_mut().target = size;
                }

                Effect::ShowCurrentPage => self.show_current_page(),

                Effect::Preload { around, radius } => {
                    self.loader.preload(around, radius);
                }

                Effect::ResizeCache(radius) => self.loader.set_preload_radius(radius),

                Effect::ReleaseMemory => {
                    self.loader.enter_background();
                }
            }
        }
    }

    fn show_current_page(&mut self) {
        let Some(page) = self.loader.page(self.state.current_page) else {
            return;
        };
        {
            let mut display = self.display.borrow_mut();
            if display.current != Some(page) {
                display.current = Some(page);
                display.shown = None;
            }
        }

        let display = Rc::clone(&self.display);
        let immediate = self.loader.request(page, move |page, preview| {
            display.borrow_mut().offer(page, preview);
        });
        // A fresh hit was already offered by the completion.
        if let Some(preview) = immediate.filter(|p| p.size != self.state.viewport) {
            self.display.borrow_mut().offer(page, Some(preview));
        }
    }

    /// Deliver finished renders without blocking
    pub fn pump(&mut self) -> usize {
        self.loader.poll_responses()
    }

    /// Deliver renders until none are pending. False on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.loader.wait_idle(timeout)
    }

    /// Preview currently on screen
    #[must_use]
    pub fn displayed(&self) -> Option<Preview> {
        self.display.borrow().shown.clone()
    }

    /// Deliveries dropped because the viewer had moved on
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.display.borrow().discarded
    }
}
