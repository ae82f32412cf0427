//! Swapchain lifecycle.
//!
//! ```text
//! Ready --(out of date / suboptimal / resize)--> Stale
//! Stale --(window has a non-zero size)--------> Rebuilding
//! Rebuilding --(recreate succeeded)-----------> Ready
//! ```

use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SwapchainState {
    #[default]
    Ready,
    /// The swapchain no longer matches the surface.
    Stale,
    Rebuilding,
}

impl SwapchainState {
    pub fn is_ready(self) -> bool {
        self == SwapchainState::Ready
    }

    pub fn needs_rebuild(self) -> bool {
        self == SwapchainState::Stale
    }

    /// A rebuild in progress stays in progress.
    pub fn mark_stale(&mut self) {
        if *self == SwapchainState::Ready {
            debug!("Swapchain marked stale");
            *self = SwapchainState::Stale;
        }
    }

    /// Returns false unless the swapchain was stale.
    pub fn begin_rebuild(&mut self) -> bool {
        if *self == SwapchainState::Stale {
            *self = SwapchainState::Rebuilding;
            true
        } else {
            false
        }
    }

    /// Ends a rebuild. A failed rebuild goes back to `Stale` so the next
    /// frame retries it.
    pub fn finish_rebuild(&mut self, succeeded: bool) {
        if *self == SwapchainState::Rebuilding {
            *self = if succeeded {
                SwapchainState::Ready
            } else {
                SwapchainState::Stale
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut state = SwapchainState::default();
        assert!(state.is_ready());

        state.mark_stale();
        assert!(state.needs_rebuild());

        assert!(state.begin_rebuild());
        assert_eq!(state, SwapchainState::Rebuilding);

        state.finish_rebuild(true);
        assert!(state.is_ready());
    }

    #[test]
    fn test_rebuild_requires_stale() {
        let mut state = SwapchainState::Ready;
        assert!(!state.begin_rebuild());
        assert_eq!(state, SwapchainState::Ready);
    }

    #[test]
    fn test_failed_rebuild_returns_to_stale() {
        let mut state = SwapchainState::Stale;
        state.begin_rebuild();
        state.finish_rebuild(false);
        assert_eq!(state, SwapchainState::Stale);
    }

    #[test]
    fn test_mark_stale_during_rebuild_is_ignored() {
        let mut state = SwapchainState::Rebuilding;
        state.mark_stale();
        assert_eq!(state, SwapchainState::Rebuilding);
        state.finish_rebuild(true);
        assert!(state.is_ready());
    }

    #[test]
    fn test_finish_without_begin_is_noop() {
        let mut state = SwapchainState::Stale;
        state.finish_rebuild(true);
        assert_eq!(state, SwapchainState::Stale);
    }
}
