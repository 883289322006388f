use crate::ui::Ui;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct LoadingState {
    pending: usize,
    visible: bool,
}

/// Reference-counted loading indicator.
///
/// The indicator is shown on the first `start_loading` and hidden once every
/// start has been matched by an `end_loading`, regardless of the order in
/// which overlapping calls complete.
///
/// The [`Ui`] is notified after the state lock is released, so it may query
/// or drive the indicator from its callbacks. Transitions still reach the
/// [`Ui`] in the order they were decided.
pub struct LoadingIndicator {
    ui: Arc<dyn Ui>,
    fade: Duration,
    state: Mutex<LoadingState>,
    transitions: ReentrantMutex<()>,
}

impl std::fmt::Debug for LoadingIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoadingIndicator")
            .field("fade", &self.fade)
            .field("pending", &state.pending)
            .field("visible", &state.visible)
            .finish_non_exhaustive()
    }
}

impl LoadingIndicator {
    #[must_use]
    pub fn new(ui: Arc<dyn Ui>, fade: Duration) -> Self {
        Self {
            ui,
            fade,
            state: Mutex::new(LoadingState::default()),
            transitions: ReentrantMutex::new(()),
        }
    }

    pub fn start_loading(&self) {
        let _order = self.transitions.lock();
        let show = {
            let mut state = self.state.lock();
            state.pending += 1;
            !std::mem::replace(&mut state.visible, true)
        };
        if show {
            self.ui.show_loading(self.fade);
        }
    }

    /// Never underflows: calling this with no pending call only re-checks
    /// visibility.
    pub fn end_loading(&self) {
        let _order = self.transitions.lock();
        let hide = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            state.pending == 0 && std::mem::replace(&mut state.visible, false)
        };
        if hide {
            self.ui.hide_loading(self.fade);
        }
    }

    /// Start loading and get a guard that ends it exactly once.
    #[must_use = "dropping the guard ends loading immediately"]
    pub fn begin(self: &Arc<Self>) -> LoadingGuard {
        self.start_loading();
        LoadingGuard {
            indicator: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }
}

/// Pairs one `start_loading` with one `end_loading`, including on early
/// return and task cancellation.
#[derive(Debug)]
pub struct LoadingGuard {
    indicator: Arc<LoadingIndicator>,
}

impl LoadingGuard {
    /// End loading now.
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.indicator.end_loading();
    }
}
