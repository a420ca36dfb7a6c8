use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::window::Viewport;

#[derive(Default)]
struct DebounceState {
    last_fire: Option<Instant>,
    last_viewport: Option<Viewport>,
    trailing: Option<JoinHandle<()>>,
    generation: u64,
}

/// Coalesces bursts of scroll events.
///
/// An event arriving more than `interval` after the last processed one fires
/// at once. Anything sooner replaces the pending trailing timer, which fires
/// with the most recent viewport once the interval has passed. A viewport
/// identical to the last processed one is dropped.
pub struct ScrollDebouncer {
    interval: Duration,
    state: Arc<Mutex<DebounceState>>,
}

impl ScrollDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, viewport: Viewport, fire: F)
    where
        F: FnOnce(Viewport) + Send + 'static,
    {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(pending) = state.trailing.take() {
            pending.abort();
        }

        let now = Instant::now();
        let wait = state
            .last_fire
            .and_then(|last| self.interval.checked_sub(now.duration_since(last)))
            .filter(|wait| !wait.is_zero());

        let Some(wait) = wait else {
            let changed = mark_fired(&mut state, viewport, now);
            drop(state);
            if changed {
                fire(viewport);
            }
            return;
        };

        trace!(
            target = "grid::debounce",
            scroll_top = viewport.scroll_top,
            wait_ms = wait.as_millis() as u64,
            "deferring scroll"
        );
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        state.trailing = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let changed = {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.trailing = None;
                mark_fired(&mut state, viewport, Instant::now())
            };
            if changed {
                fire(viewport);
            }
        }));
    }

    /// Drops any pending trailing event and forgets the last position.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(pending) = state.trailing.take() {
            pending.abort();
        }
        state.last_fire = None;
        state.last_viewport = None;
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().trailing.is_some()
    }
}

impl Drop for ScrollDebouncer {
    fn drop(&mut self) {
        if let Some(pending) = self.state.lock().trailing.take() {
            pending.abort();
        }
    }
}

/// Records a processed event. Returns false when the viewport did not move.
fn mark_fired(state: &mut DebounceState, viewport: Viewport, now: Instant) -> bool {
    state.last_fire = Some(now);
    if state.last_viewport == Some(viewport) {
        trace!(
            target = "grid::debounce",
            scroll_top = viewport.scroll_top,
            "scroll position unchanged"
        );
        return false;
    }
    state.last_viewport = Some(viewport);
    true
}
