use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::GridConfig;
use crate::coordinator::{Admission, RequestCoordinator};
use crate::debounce::ScrollDebouncer;
use crate::error::{GridError, GridResult};
use crate::row::{Row, RowId, RowKey, RowPage, TableId, ViewId};
use crate::service::{RowService, ServiceError};
use crate::store::{BufferDelta, BufferStore, BufferWindow, GridEvent};
use crate::window::{IndexRange, Viewport, WindowPlan};

/// Discarded pages (stale buffer or server count drift) tolerated by one
/// scroll-driven fetch before it gives up and waits for the next scroll.
const MAX_REPLAN_ATTEMPTS: usize = 3;

/// The remote view a grid is showing and the table its rows belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSource {
    pub view_id: ViewId,
    pub table_id: TableId,
}

impl GridSource {
    pub fn new(view_id: ViewId, table_id: TableId) -> Self {
        Self { view_id, table_id }
    }
}

pub(crate) struct GridState {
    pub(crate) source: Option<GridSource>,
    pub(crate) store: BufferStore,
    pub(crate) requests: RequestCoordinator,
    /// Set while `load` waits for the first page. The count is unknown, so
    /// scroll fetches are held back and the latest one is replayed after.
    filling: bool,
    scroll_during_fill: Option<Viewport>,
}

pub(crate) struct GridInner {
    pub(crate) config: GridConfig,
    pub(crate) service: Arc<dyn RowService>,
    pub(crate) state: Mutex<GridState>,
    debouncer: ScrollDebouncer,
}

/// Handle to one grid view's buffer. Clones share the same buffer.
#[derive(Clone)]
pub struct GridView {
    pub(crate) inner: Arc<GridInner>,
}

struct PendingFetch {
    source: GridSource,
    plan: WindowPlan,
    ticket: u64,
    cancel: CancellationToken,
    revision: u64,
}

enum FetchStep {
    Done,
    /// The page was applied but only covered part of the window.
    Continue,
    /// The page was discarded; plan again from the current buffer.
    Retry,
}

impl GridView {
    pub fn new(config: GridConfig, service: Arc<dyn RowService>) -> GridResult<Self> {
        config.validate()?;
        let debouncer = ScrollDebouncer::new(config.scroll_quiescence);
        Ok(Self {
            inner: Arc::new(GridInner {
                config,
                service,
                state: Mutex::new(GridState {
                    source: None,
                    store: BufferStore::new(),
                    requests: RequestCoordinator::new(),
                    filling: false,
                    scroll_during_fill: None,
                }),
                debouncer,
            }),
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.inner.state.lock().store.subscribe()
    }

    pub fn source(&self) -> Option<GridSource> {
        self.inner.state.lock().source
    }

    pub fn window(&self) -> BufferWindow {
        self.inner.state.lock().store.window()
    }

    pub fn count(&self) -> usize {
        self.inner.state.lock().store.count()
    }

    pub fn placeholder_height(&self) -> f64 {
        let count = self.count();
        self.inner.config.placeholder_height(count)
    }

    pub fn rows_top(&self) -> f64 {
        self.inner.state.lock().store.rows_top()
    }

    pub fn visible_rows(&self) -> Vec<Row> {
        self.inner.state.lock().store.visible_rows().to_vec()
    }

    /// Runs `f` over the visible rows without copying them. `f` must not call
    /// back into this view.
    pub fn with_visible_rows<R>(&self, f: impl FnOnce(&[Row]) -> R) -> R {
        f(self.inner.state.lock().store.visible_rows())
    }

    pub fn rows(&self) -> Vec<Row> {
        self.inner.state.lock().store.rows().to_vec()
    }

    pub fn row(&self, key: RowKey) -> Option<Row> {
        self.inner.state.lock().store.row(key).cloned()
    }

    pub fn find_by_id(&self, id: RowId) -> Option<Row> {
        self.inner.state.lock().store.find_by_id(id).cloned()
    }

    pub fn in_flight(&self) -> Option<IndexRange> {
        self.inner.state.lock().requests.in_flight()
    }

    /// Merges server rows into buffered rows with the same id.
    pub fn update_rows(&self, rows: &[Row]) -> usize {
        self.inner.state.lock().store.update_rows(rows)
    }

    /// Opens `source`: drops whatever was buffered and fills the buffer with
    /// the first two pages.
    pub async fn load(&self, source: GridSource, viewport_height: f64) -> GridResult<()> {
        let limit = self.inner.config.initial_limit();
        self.inner.debouncer.reset();
        let admission = {
            let mut state = self.inner.state.lock();
            state.requests.cancel_all();
            state.store.clear();
            state.source = Some(source);
            state.filling = true;
            state.scroll_during_fill = None;
            state.requests.admit(IndexRange::with_len(0, limit))
        };
        let Admission::Issued { ticket, cancel } = admission else {
            return Ok(());
        };

        info!(
            target = "grid::fetch",
            view_id = source.view_id.0,
            limit,
            "loading grid view"
        );
        let result = self
            .inner
            .service
            .fetch_rows(source.view_id, 0, limit, &cancel)
            .await;

        let mut state = self.inner.state.lock();
        if !state.requests.complete(ticket) || state.source != Some(source) {
            trace!(target = "grid::fetch", "initial fetch superseded");
            return Ok(());
        }
        state.filling = false;
        let replay = state.scroll_during_fill.take();
        match result {
            Ok(page) => {
                state
                    .store
                    .initial_fill(page, viewport_height, &self.inner.config);
                drop(state);
                if let Some(viewport) = replay {
                    debug!(
                        target = "grid::fetch",
                        scroll_top = viewport.scroll_top,
                        "replaying scroll received during initial fill"
                    );
                    self.process_scroll(viewport);
                }
                Ok(())
            }
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => {
                state.store.emit(GridEvent::FetchFailed {
                    offset: 0,
                    limit,
                    reason: err.to_string(),
                });
                Err(GridError::Fetch {
                    offset: 0,
                    limit,
                    source: err,
                })
            }
        }
    }

    /// Cancels outstanding work and empties the buffer.
    pub fn close(&self) {
        self.inner.debouncer.reset();
        let mut state = self.inner.state.lock();
        state.requests.cancel_all();
        state.store.clear();
        state.source = None;
        state.filling = false;
        state.scroll_during_fill = None;
        debug!(target = "grid::fetch", "grid view closed");
    }

    /// Entry point for UI scroll callbacks; may be called every frame.
    pub fn on_scroll(&self, viewport: Viewport) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.debouncer.submit(viewport, move |viewport| {
            if let Some(inner) = inner.upgrade() {
                GridView { inner }.process_scroll(viewport);
            }
        });
    }

    fn process_scroll(&self, viewport: Viewport) {
        if self.source().is_none() {
            return;
        }
        self.visible_by_scroll_top(Some(viewport));
        self.spawn_fetch(viewport);
    }

    /// Recomputes the visible slice, for `viewport` or the last known one.
    /// Returns whether it changed.
    pub fn visible_by_scroll_top(&self, viewport: Option<Viewport>) -> bool {
        self.inner
            .state
            .lock()
            .store
            .refresh_visible(&self.inner.config, viewport)
    }

    /// Brings the buffer in line with `viewport`, fetching only rows it does
    /// not hold yet. Resolves to `Ok(())` without touching the buffer when a
    /// newer request supersedes this one. While `load` is still waiting for
    /// the first page the viewport is queued and fetched once the fill lands.
    pub async fn fetch_by_scroll_top(&self, viewport: Viewport) -> GridResult<()> {
        self.drive_fetch(Some(viewport), None).await
    }

    /// Plans and admits the fetch synchronously, then awaits it on a task.
    pub(crate) fn spawn_fetch(&self, viewport: Viewport) {
        let pending = match self.begin_fetch(Some(viewport)) {
            Ok(Some(pending)) => pending,
            Ok(None) => return,
            Err(err) => {
                debug!(target = "grid::fetch", error = %err, "scroll fetch skipped");
                return;
            }
        };
        let view = self.clone();
        tokio::spawn(async move {
            if let Err(err) = view.drive_fetch(None, Some(pending)).await {
                warn!(target = "grid::fetch", error = %err, "scroll fetch failed");
            }
        });
    }

    /// Only the first plan uses `requested`; follow-up plans read the newest
    /// viewport from the store so a scroll made meanwhile is not undone.
    async fn drive_fetch(
        &self,
        mut requested: Option<Viewport>,
        mut next: Option<PendingFetch>,
    ) -> GridResult<()> {
        let mut retries = 0;
        loop {
            let pending = match next.take() {
                Some(pending) => pending,
                None => match self.begin_fetch(requested.take())? {
                    Some(pending) => pending,
                    None => return Ok(()),
                },
            };
            let request = pending.plan.request;
            trace!(
                target = "grid::fetch",
                range = %request,
                ticket = pending.ticket,
                "fetching rows"
            );
            let result = self
                .inner
                .service
                .fetch_rows(
                    pending.source.view_id,
                    request.start,
                    request.len(),
                    &pending.cancel,
                )
                .await;
            match self.finish_fetch(&pending, result)? {
                FetchStep::Done => return Ok(()),
                FetchStep::Continue => {}
                FetchStep::Retry => {
                    retries += 1;
                    if retries > MAX_REPLAN_ATTEMPTS {
                        debug!(
                            target = "grid::fetch",
                            retries,
                            "giving up on window until next scroll"
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Plans for `viewport`, or for the last recorded viewport when `None`.
    fn begin_fetch(&self, viewport: Option<Viewport>) -> GridResult<Option<PendingFetch>> {
        let mut state = self.inner.state.lock();
        let source = state.source.ok_or(GridError::NoView)?;
        if state.filling {
            if viewport.is_some() {
                state.scroll_during_fill = viewport;
            }
            trace!(target = "grid::fetch", "initial fill pending, holding fetch");
            return Ok(None);
        }
        let viewport = match viewport {
            Some(viewport) => {
                state.store.set_viewport(viewport);
                viewport
            }
            None => state.store.viewport(),
        };
        let Some(plan) = state.store.plan(&self.inner.config, viewport) else {
            // the window is already held; anything still pending is stale
            state.requests.cancel_all();
            return Ok(None);
        };
        match state.requests.admit(plan.request) {
            Admission::Duplicate => Ok(None),
            Admission::Issued { ticket, cancel } => {
                debug!(
                    target = "grid::fetch",
                    direction = ?plan.direction,
                    target_range = %plan.target,
                    request = %plan.request,
                    prepend = plan.prepend,
                    append = plan.append,
                    "planned buffer fetch"
                );
                Ok(Some(PendingFetch {
                    source,
                    plan,
                    ticket,
                    cancel,
                    revision: state.store.revision(),
                }))
            }
        }
    }

    fn finish_fetch(
        &self,
        pending: &PendingFetch,
        result: Result<RowPage, ServiceError>,
    ) -> GridResult<FetchStep> {
        let config = &self.inner.config;
        let request = pending.plan.request;
        let mut state = self.inner.state.lock();
        let current = state.requests.complete(pending.ticket);
        if !current || pending.cancel.is_cancelled() || state.source != Some(pending.source) {
            trace!(target = "grid::fetch", range = %request, "fetch superseded");
            return Ok(FetchStep::Done);
        }

        let page = match result {
            Ok(page) => page,
            Err(err) if err.is_cancelled() => return Ok(FetchStep::Done),
            Err(err) => {
                state.store.refresh_visible(config, None);
                state.store.emit(GridEvent::FetchFailed {
                    offset: request.start,
                    limit: request.len(),
                    reason: err.to_string(),
                });
                return Err(GridError::Fetch {
                    offset: request.start,
                    limit: request.len(),
                    source: err,
                });
            }
        };

        if state.store.revision() != pending.revision {
            debug!(
                target = "grid::fetch",
                range = %request,
                "buffer changed during fetch, re-planning"
            );
            state.store.refresh_visible(config, None);
            return Ok(FetchStep::Retry);
        }
        if page.rows.len() < request.len() {
            debug!(
                target = "grid::fetch",
                range = %request,
                received = page.rows.len(),
                count = page.count,
                "short page, adopting server count"
            );
            state.store.set_count(page.count);
            state.store.refresh_visible(config, None);
            return Ok(FetchStep::Retry);
        }

        state
            .store
            .apply_delta(BufferDelta::from_plan(&pending.plan, page));
        state.store.refresh_visible(config, None);
        if pending.plan.deferred {
            Ok(FetchStep::Continue)
        } else {
            Ok(FetchStep::Done)
        }
    }
}
