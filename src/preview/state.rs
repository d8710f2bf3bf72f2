//! Viewer state management

use super::types::RenderSize;

/// What the viewer is currently showing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerState {
    /// Current viewport, already rounded to pixels
    pub viewport: RenderSize,

    /// Current page (1-based, 0 while the document is empty)
    pub current_page: usize,

    /// Total page count
    pub page_count: usize,

    /// Pages preloaded on each side of the current page
    pub preload_radius: usize,

    /// Host app is suspended
    pub backgrounded: bool,
}

impl ViewerState {
    #[must_use]
    pub fn new(preload_radius: usize) -> Self {
        Self {
            viewport: RenderSize::ZERO,
            current_page: 0,
            page_count: 0,
            preload_radius,
            backgrounded: false,
        }
    }

    /// State for a freshly opened document, positioned on its first page
    #[must_use]
    pub fn for_document(page_count: usize, preload_radius: usize) -> Self {
        Self {
            current_page: usize::from(page_count > 0),
            page_count,
            ..Self::new(preload_radius)
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::SetViewport { width, height } => {
                let size = RenderSize::from_viewport(width, height);
                if self.viewport != size {
                    self.viewport = size;
                    let mut effects = vec![Effect::SetTargetSize(size)];
                    effects.extend(self.show_current());
                    effects
                } else {
                    vec![]
                }
            }

            Command::GoToPage(page) => {
                if self.page_count == 0 {
                    return vec![];
                }
                let clamped = page.clamp(1, self.page_count);
                if self.current_page != clamped {
                    self.current_page = clamped;
                    self.show_current()
                } else {
                    vec![]
                }
            }

            Command::SetPageCount(count) => {
                self.page_count = count;
                let clamped = if count == 0 {
                    0
                } else {
                    self.current_page.clamp(1, count)
                };
                if self.current_page != clamped {
                    self.current_page = clamped;
                    self.show_current()
                } else {
                    vec![]
                }
            }

            Command::SetPreloadRadius(radius) => {
                if self.preload_radius != radius {
                    self.preload_radius = radius;
                    let mut effects = vec![Effect::ResizeCache(radius)];
                    effects.extend(self.preload());
                    effects
                } else {
                    vec![]
                }
            }

            Command::EnterBackground => {
                if self.backgrounded {
                    vec![]
                } else {
                    self.backgrounded = true;
                    vec![Effect::ReleaseMemory]
                }
            }

            Command::EnterForeground => {
                if self.backgrounded {
                    self.backgrounded = false;
                    self.show_current()
                } else {
                    vec![]
                }
            }
        }
    }

    fn show_current(&self) -> Vec<Effect> {
        if self.current_page == 0 {
            return vec![];
        }
        let mut effects = vec![Effect::ShowCurrentPage];
        effects.extend(self.preload());
        effects
    }

    fn preload(&self) -> Option<Effect> {
        (self.current_page > 0 && self.preload_radius > 0).then_some(Effect::Preload {
            around: self.current_page,
            radius: self.preload_radius,
        })
    }
}

/// Commands that modify viewer state
#[derive(Clone, Debug)]
pub enum Command {
    /// Viewport was laid out at a new size
    SetViewport { width: f32, height: f32 },
    /// Go to a specific page (1-based)
    GoToPage(usize),
    /// Update the page count
    SetPageCount(usize),
    /// Change how many neighbours are preloaded
    SetPreloadRadius(usize),
    /// Host app suspended
    EnterBackground,
    /// Host app resumed
    EnterForeground,
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Render later requests at this size
    SetTargetSize(RenderSize),
    /// Request the current page for display
    ShowCurrentPage,
    /// Warm the neighbourhood of a page
    Preload { around: usize, radius: usize },
    /// Recompute cache capacity for a new radius
    ResizeCache(usize),
    /// Drop cached previews if the loader is configured to
    ReleaseMemory,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> ViewerState {
        ViewerState::for_document(20, 2)
    }

    #[test]
    fn opened_document_starts_on_page_one() {
        let state = test_state();
        assert_eq!(state.current_page, 1);
        assert_eq!(state.page_count, 20);
        assert!(state.viewport.is_unset());
        assert_eq!(ViewerState::for_document(0, 2).current_page, 0);
    }

    #[test]
    fn set_viewport_no_change_returns_empty() {
        let mut state = test_state();
        state.viewport = RenderSize::new(800, 600);

        let effects = state.apply(Command::SetViewport {
            width: 800.2,
            height: 599.7,
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn set_viewport_with_change_sets_size_and_shows() {
        let mut state = test_state();

        let effects = state.apply(Command::SetViewport {
            width: 1024.0,
            height: 768.0,
        });
        assert_eq!(state.viewport, RenderSize::new(1024, 768));
        assert_eq!(
            effects,
            vec![
                Effect::SetTargetSize(RenderSize::new(1024, 768)),
                Effect::ShowCurrentPage,
                Effect::Preload {
                    around: 1,
                    radius: 2
                },
            ]
        );
    }

    #[test]
    fn go_to_page_updates_and_preloads() {
        let mut state = test_state();

        let effects = state.apply(Command::GoToPage(10));
        assert_eq!(state.current_page, 10);
        assert_eq!(
            effects,
            vec![
                Effect::ShowCurrentPage,
                Effect::Preload {
                    around: 10,
                    radius: 2
                }
            ]
        );
    }

    #[test]
    fn go_to_page_clamps_to_range() {
        let mut state = test_state();

        state.apply(Command::GoToPage(999));
        assert_eq!(state.current_page, 20);

        state.apply(Command::GoToPage(0));
        assert_eq!(state.current_page, 1);
    }

    #[test]
    fn empty_document_has_no_current_page() {
        let mut state = ViewerState::new(1);
        assert!(state.apply(Command::GoToPage(3)).is_empty());

        let effects = state.apply(Command::SetPageCount(5));
        assert_eq!(state.current_page, 1);
        assert_eq!(effects[0], Effect::ShowCurrentPage);

        state.apply(Command::SetPageCount(0));
        assert_eq!(state.current_page, 0);
    }

    #[test]
    fn zero_radius_skips_preload() {
        let mut state = test_state();
        let effects = state.apply(Command::SetPreloadRadius(0));
        assert_eq!(effects, vec![Effect::ResizeCache(0)]);

        let effects = state.apply(Command::GoToPage(4));
        assert_eq!(effects, vec![Effect::ShowCurrentPage]);
    }

    #[test]
    fn background_round_trip() {
        let mut state = test_state();
        assert_eq!(
            state.apply(Command::EnterBackground),
            vec![Effect::ReleaseMemory]
        );
        assert!(state.apply(Command::EnterBackground).is_empty());
        assert_eq!(
            state.apply(Command::EnterForeground)[0],
            Effect::ShowCurrentPage
        );
    }
}
