//! The row buffer owned by one grid view.
//!
//! `rows[i]` always holds the row at absolute index `buffer_start + i` and
//! `buffer_start + rows.len() <= count`. Every mutation is a single
//! synchronous call; observers learn about it through [`GridEvent`]s emitted
//! before the call returns.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::GridConfig;
use crate::row::{Row, RowEphemeral, RowId, RowKey, RowPage};
use crate::window::{self, IndexRange, Viewport, VisibleSlice, WindowPlan};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    Cleared,
    BufferChanged {
        count: usize,
        buffer_start: usize,
        buffer_limit: usize,
    },
    VisibleChanged {
        start: usize,
        end: usize,
        top: f64,
    },
    RowChanged {
        key: RowKey,
    },
    RowRemoved {
        id: RowId,
    },
    FieldAdded {
        name: String,
    },
    FetchFailed {
        offset: usize,
        limit: usize,
        reason: String,
    },
}

/// Snapshot of the window bookkeeping, without the rows themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferWindow {
    pub count: usize,
    pub buffer_start: usize,
    pub buffer_limit: usize,
    pub rows_start: usize,
    pub rows_end: usize,
    pub rows_top: f64,
}

impl BufferWindow {
    pub fn buffer_end(&self) -> usize {
        self.buffer_start + self.buffer_limit
    }
}

/// Splice instruction: rows fetched for a [`WindowPlan`] plus the window the
/// buffer describes once they are in place.
#[derive(Debug, Clone)]
pub struct BufferDelta {
    pub rows: Vec<Row>,
    pub prepend: isize,
    pub append: isize,
    pub count: usize,
    pub start: usize,
    pub limit: usize,
}

impl BufferDelta {
    pub fn from_plan(plan: &WindowPlan, page: RowPage) -> Self {
        Self {
            rows: page.rows,
            prepend: plan.prepend,
            append: plan.append,
            count: page.count,
            start: plan.target.start,
            limit: plan.target.len(),
        }
    }
}

pub struct BufferStore {
    count: usize,
    buffer_start: usize,
    rows: Vec<Row>,
    rows_start: usize,
    rows_end: usize,
    rows_top: f64,
    viewport: Viewport,
    last_key: u64,
    revision: u64,
    events: broadcast::Sender<GridEvent>,
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            count: 0,
            buffer_start: 0,
            rows: Vec::new(),
            rows_start: 0,
            rows_end: 0,
            rows_top: 0.0,
            viewport: Viewport::default(),
            last_key: 0,
            revision: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: GridEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn window(&self) -> BufferWindow {
        BufferWindow {
            count: self.count,
            buffer_start: self.buffer_start,
            buffer_limit: self.rows.len(),
            rows_start: self.rows_start,
            rows_end: self.rows_end,
            rows_top: self.rows_top,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn buffer_start(&self) -> usize {
        self.buffer_start
    }

    pub fn buffer_limit(&self) -> usize {
        self.rows.len()
    }

    pub fn buffer_range(&self) -> IndexRange {
        IndexRange::with_len(self.buffer_start, self.rows.len())
    }

    /// Bumped on every structural change (rows added, removed or shifted).
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Last viewport passed to [`BufferStore::refresh_visible`].
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn visible_rows(&self) -> &[Row] {
        let end = self.rows_end.min(self.rows.len());
        let start = self.rows_start.min(end);
        &self.rows[start..end]
    }

    pub fn rows_top(&self) -> f64 {
        self.rows_top
    }

    pub fn row(&self, key: RowKey) -> Option<&Row> {
        self.rows.iter().find(|row| row.ephemeral.key == key)
    }

    pub fn find_by_id(&self, id: RowId) -> Option<&Row> {
        if id.is_unsaved() {
            return None;
        }
        self.rows.iter().find(|row| row.id == id)
    }

    fn row_mut(&mut self, key: RowKey) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.ephemeral.key == key)
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.buffer_start = 0;
        self.rows.clear();
        self.rows_start = 0;
        self.rows_end = 0;
        self.rows_top = 0.0;
        self.viewport.scroll_top = 0.0;
        self.revision += 1;
        self.emit(GridEvent::Cleared);
    }

    /// Loads the first page of a freshly opened view and shows the first
    /// screenful of it.
    pub fn initial_fill(&mut self, page: RowPage, viewport_height: f64, cfg: &GridConfig) {
        let mut rows = page.rows;
        rows.truncate(cfg.initial_limit().min(page.count));
        self.rows = self.adopt(rows);
        self.count = page.count;
        self.buffer_start = 0;
        self.viewport = Viewport::new(0.0, viewport_height);
        self.revision += 1;
        debug!(
            target = "grid::buffer",
            count = self.count,
            buffer_limit = self.rows.len(),
            "initial fill"
        );
        self.emit_buffer_changed();

        let screenful = (viewport_height / cfg.row_height).ceil().max(0.0) as usize + 1;
        self.set_visible_slice(VisibleSlice {
            start: 0,
            end: screenful.min(self.rows.len()),
            top: 0.0,
        });
        self.check_invariants();
    }

    /// Splices fetched rows onto the buffer. Positive counts add rows taken
    /// from the front of `delta.rows`, negative counts drop rows from that end.
    pub fn apply_delta(&mut self, delta: BufferDelta) {
        let BufferDelta {
            rows,
            prepend,
            append,
            count,
            start,
            limit,
        } = delta;
        debug_assert!(
            prepend <= 0 || append <= 0,
            "cannot grow both ends from one page"
        );

        let mut incoming = self.adopt(rows);
        if prepend > 0 {
            incoming.truncate(prepend as usize);
            incoming.append(&mut self.rows);
            self.rows = incoming;
        } else if append > 0 {
            incoming.truncate(append as usize);
            self.rows.extend(incoming);
        }
        if prepend < 0 {
            let drop = prepend.unsigned_abs().min(self.rows.len());
            self.rows.drain(..drop);
        }
        if append < 0 {
            let keep = self.rows.len().saturating_sub(append.unsigned_abs());
            self.rows.truncate(keep);
        }
        debug_assert_eq!(self.rows.len(), limit, "splice produced wrong buffer length");

        self.count = count;
        self.buffer_start = start;
        self.clamp_to_count();
        self.clamp_visible();
        self.revision += 1;
        trace!(
            target = "grid::buffer",
            prepend,
            append,
            count,
            buffer_start = start,
            buffer_limit = self.rows.len(),
            "applied buffer delta"
        );
        self.emit_buffer_changed();
        self.check_invariants();
    }

    /// Adopts a count reported by the server without new rows, dropping rows
    /// that no longer exist.
    pub fn set_count(&mut self, count: usize) {
        if count == self.count {
            return;
        }
        self.count = count;
        self.clamp_to_count();
        self.clamp_visible();
        self.revision += 1;
        self.emit_buffer_changed();
        self.check_invariants();
    }

    /// Returns whether anything changed.
    pub fn set_visible_slice(&mut self, slice: VisibleSlice) -> bool {
        if slice.start == self.rows_start && slice.end == self.rows_end && slice.top == self.rows_top
        {
            return false;
        }
        self.rows_start = slice.start;
        self.rows_end = slice.end;
        self.rows_top = slice.top;
        self.emit(GridEvent::VisibleChanged {
            start: slice.start,
            end: slice.end,
            top: slice.top,
        });
        true
    }

    /// Records the latest viewport without recomputing the visible slice.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Recomputes the visible slice for `viewport`, or for the last known
    /// viewport when `None`.
    pub fn refresh_visible(&mut self, cfg: &GridConfig, viewport: Option<Viewport>) -> bool {
        if let Some(viewport) = viewport {
            self.viewport = viewport;
        }
        let visible = window::visible_range(self.viewport, cfg, self.count);
        let slice = window::visible_slice(visible, self.buffer_range(), cfg.row_height);
        self.set_visible_slice(slice)
    }

    /// Plans the fetch needed to buffer the rows around `viewport`.
    pub fn plan(&self, cfg: &GridConfig, viewport: Viewport) -> Option<WindowPlan> {
        let visible = window::visible_range(viewport, cfg, self.count);
        let desired = window::buffer_range(visible, cfg.buffer_request_size, self.count);
        window::plan_window(desired, self.buffer_range())
    }

    /// Sets one field of a buffered row. The outer `None` means the row is
    /// not buffered, the inner one that the field had no value.
    pub fn set_cell_value(
        &mut self,
        key: RowKey,
        field: &str,
        value: Value,
    ) -> Option<Option<Value>> {
        let row = self.row_mut(key)?;
        let previous = row.set_value(field, value);
        self.emit(GridEvent::RowChanged { key });
        Some(previous)
    }

    /// Reverts a cell to what [`BufferStore::set_cell_value`] returned.
    pub fn restore_cell(&mut self, key: RowKey, field: &str, previous: Option<Value>) -> bool {
        let Some(row) = self.row_mut(key) else {
            return false;
        };
        row.restore_value(field, previous);
        self.emit(GridEvent::RowChanged { key });
        true
    }

    /// Removes a persisted row. The count drops even when the row lies outside
    /// the buffer.
    pub fn delete_row(&mut self, id: RowId) -> bool {
        let floor = self.buffer_start + self.rows.len();
        let removed = match self.rows.iter().position(|row| row.id == id && !id.is_unsaved()) {
            Some(index) => {
                self.rows.remove(index);
                true
            }
            None => false,
        };
        let floor = if removed { floor - 1 } else { floor };
        self.count = self.count.saturating_sub(1).max(floor);
        self.clamp_visible();
        self.revision += 1;
        if removed {
            self.emit(GridEvent::RowRemoved { id });
        }
        self.emit_buffer_changed();
        self.check_invariants();
        removed
    }

    /// Appends an unsaved row at the end of the buffer and grows the count
    /// with it.
    pub fn push_placeholder(&mut self, row: Row) -> RowKey {
        let mut row = row;
        let key = self.next_key();
        row.ephemeral.key = key;
        row.ephemeral.loading = true;
        self.rows.push(row);
        self.count += 1;
        self.revision += 1;
        self.emit_buffer_changed();
        self.emit(GridEvent::RowChanged { key });
        self.check_invariants();
        key
    }

    /// Gives a placeholder the identity and values the server assigned.
    pub fn finalize_row(&mut self, key: RowKey, saved: &Row) -> bool {
        let Some(row) = self.row_mut(key) else {
            return false;
        };
        row.merge_from(saved);
        row.ephemeral.loading = false;
        row.ephemeral.failed = false;
        self.emit(GridEvent::RowChanged { key });
        true
    }

    pub fn mark_create_failed(&mut self, key: RowKey) -> bool {
        let Some(row) = self.row_mut(key) else {
            return false;
        };
        row.ephemeral.loading = false;
        row.ephemeral.failed = true;
        self.emit(GridEvent::RowChanged { key });
        true
    }

    pub fn set_row_loading(&mut self, key: RowKey, loading: bool) -> bool {
        self.update_ephemeral(key, |ephemeral| ephemeral.loading = loading)
    }

    pub fn set_row_hover(&mut self, key: RowKey, hover: bool) -> bool {
        self.update_ephemeral(key, |ephemeral| ephemeral.hover = hover)
    }

    fn update_ephemeral(&mut self, key: RowKey, apply: impl FnOnce(&mut RowEphemeral)) -> bool {
        let Some(row) = self.row_mut(key) else {
            return false;
        };
        let before = row.ephemeral.clone();
        apply(&mut row.ephemeral);
        if row.ephemeral != before {
            self.emit(GridEvent::RowChanged { key });
        }
        true
    }

    /// Sets `name` on every buffered row.
    pub fn add_field(&mut self, name: &str, value: Value) {
        for row in &mut self.rows {
            row.values.insert(name.to_string(), value.clone());
        }
        self.emit(GridEvent::FieldAdded {
            name: name.to_string(),
        });
    }

    /// Merges server rows into buffered rows with the same id. Returns how many
    /// rows were updated.
    pub fn update_rows(&mut self, incoming: &[Row]) -> usize {
        let mut updated = Vec::new();
        for source in incoming.iter().filter(|row| !row.id.is_unsaved()) {
            if let Some(row) = self.rows.iter_mut().find(|row| row.id == source.id) {
                row.merge_from(source);
                updated.push(row.ephemeral.key);
            }
        }
        for key in &updated {
            self.emit(GridEvent::RowChanged { key: *key });
        }
        updated.len()
    }

    fn next_key(&mut self) -> RowKey {
        self.last_key += 1;
        RowKey(self.last_key)
    }

    fn adopt(&mut self, rows: Vec<Row>) -> Vec<Row> {
        rows.into_iter()
            .map(|mut row| {
                row.ephemeral.key = self.next_key();
                row
            })
            .collect()
    }

    fn clamp_to_count(&mut self) {
        if self.buffer_start > self.count {
            self.buffer_start = self.count;
            self.rows.clear();
        } else if self.buffer_start + self.rows.len() > self.count {
            self.rows.truncate(self.count - self.buffer_start);
        }
    }

    fn clamp_visible(&mut self) {
        let len = self.rows.len();
        self.rows_end = self.rows_end.min(len);
        self.rows_start = self.rows_start.min(self.rows_end);
    }

    fn emit_buffer_changed(&self) {
        self.emit(GridEvent::BufferChanged {
            count: self.count,
            buffer_start: self.buffer_start,
            buffer_limit: self.rows.len(),
        });
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.buffer_start + self.rows.len() <= self.count,
            "buffer {}+{} exceeds count {}",
            self.buffer_start,
            self.rows.len(),
            self.count
        );
        debug_assert!(
            self.rows_start <= self.rows_end && self.rows_end <= self.rows.len(),
            "visible slice {}..{} outside buffer of {}",
            self.rows_start,
            self.rows_end,
            self.rows.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FieldValues;
    use serde_json::json;

    const COUNT: usize = 1000;

    fn row_at(index: usize) -> Row {
        let mut values = FieldValues::new();
        values.insert("field_1".into(), json!(index));
        Row::new(RowId(index as u64 + 1), values)
    }

    fn page(range: IndexRange, count: usize) -> RowPage {
        RowPage {
            offset: range.start,
            limit: range.len(),
            count,
            rows: (range.start..range.end.min(count)).map(row_at).collect(),
        }
    }

    fn filled() -> BufferStore {
        let mut store = BufferStore::new();
        store.initial_fill(
            page(IndexRange::new(0, 80), COUNT),
            660.0,
            &GridConfig::default(),
        );
        store
    }

    fn assert_aligned(store: &BufferStore) {
        let window = store.window();
        assert_eq!(store.rows().len(), window.buffer_limit);
        assert!(window.buffer_end() <= window.count);
        for (offset, row) in store.rows().iter().enumerate() {
            assert_eq!(row.id, RowId((window.buffer_start + offset) as u64 + 1));
        }
    }

    fn scroll_to(store: &mut BufferStore, middle: usize) {
        let cfg = GridConfig::default();
        let viewport = Viewport::new((middle as f64 + 1.0) * 33.0 - 330.0, 660.0);
        if let Some(plan) = store.plan(&cfg, viewport) {
            let fetched = page(plan.request, store.count());
            store.apply_delta(BufferDelta::from_plan(&plan, fetched));
        }
        store.refresh_visible(&cfg, Some(viewport));
    }

    #[test]
    fn initial_fill_shows_first_screenful() {
        let store = filled();
        let window = store.window();
        assert_eq!(window.count, COUNT);
        assert_eq!((window.buffer_start, window.buffer_limit), (0, 80));
        assert_eq!((window.rows_start, window.rows_end), (0, 21));
        assert_eq!(window.rows_top, 0.0);
        assert_eq!(store.visible_rows().len(), 21);
    }

    #[test]
    fn initial_fill_of_short_table_holds_everything() {
        let mut store = BufferStore::new();
        store.initial_fill(page(IndexRange::new(0, 80), 5), 660.0, &GridConfig::default());
        let window = store.window();
        assert_eq!((window.count, window.buffer_limit), (5, 5));
        assert_eq!(window.rows_end, 5);
    }

    #[test]
    fn delta_sequences_keep_rows_aligned() {
        let mut store = filled();
        for middle in [500, 480, 30, 999, 998, 0, 120, 121, 700, 650] {
            scroll_to(&mut store, middle);
            assert_aligned(&store);
            assert!(store.buffer_limit() <= 3 * 40 + 40);
        }
    }

    #[test]
    fn jump_to_middle_fetches_pages_around_it() {
        let mut store = filled();
        scroll_to(&mut store, 500);
        let window = store.window();
        assert_eq!((window.buffer_start, window.buffer_limit), (440, 120));
        assert_eq!((window.rows_start, window.rows_end), (44, 77));
        assert_eq!(store.visible_rows()[0].id, RowId(485));
    }

    #[test]
    fn unchanged_visible_slice_is_not_reapplied() {
        let mut store = filled();
        let mut events = store.subscribe();
        let cfg = GridConfig::default();
        assert!(store.refresh_visible(&cfg, Some(Viewport::new(0.0, 660.0))));
        assert!(!store.refresh_visible(&cfg, Some(Viewport::new(0.0, 660.0))));
        assert!(matches!(
            events.try_recv(),
            Ok(GridEvent::VisibleChanged { start: 0, end: 26, .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn keys_are_unique_across_fills() {
        let mut store = filled();
        scroll_to(&mut store, 500);
        scroll_to(&mut store, 0);
        let mut keys: Vec<_> = store.rows().iter().map(Row::key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), store.rows().len());
    }

    #[test]
    fn deleting_buffered_row_shrinks_buffer_and_count() {
        let mut store = filled();
        assert!(store.delete_row(RowId(3)));
        assert_eq!(store.count(), COUNT - 1);
        assert_eq!(store.buffer_limit(), 79);
        assert!(store.find_by_id(RowId(3)).is_none());

        assert!(!store.delete_row(RowId(900)));
        assert_eq!(store.count(), COUNT - 2);
        assert_eq!(store.buffer_limit(), 79);
    }

    #[test]
    fn count_never_drops_below_buffer_end() {
        let mut store = BufferStore::new();
        store.initial_fill(page(IndexRange::new(0, 80), 10), 660.0, &GridConfig::default());
        assert!(!store.delete_row(RowId(4242)));
        assert_eq!(store.count(), 10);
    }

    #[test]
    fn shrinking_server_count_truncates_buffer() {
        let mut store = filled();
        store.set_count(50);
        assert_eq!(store.buffer_limit(), 50);
        assert!(store.window().rows_end <= 50);
        store.set_count(0);
        assert_eq!(store.buffer_limit(), 0);
        assert_eq!(store.buffer_start(), 0);
    }

    #[test]
    fn placeholder_grows_count_and_can_be_finalized() {
        let mut store = BufferStore::new();
        store.initial_fill(page(IndexRange::new(0, 5), 5), 660.0, &GridConfig::default());
        let key = store.push_placeholder(Row::placeholder(FieldValues::new()));
        assert_eq!(store.count(), 6);
        assert_eq!(store.buffer_limit(), 6);
        let row = store.row(key).expect("placeholder");
        assert!(row.id.is_unsaved());
        assert!(row.ephemeral.loading);

        let saved = Row::new(RowId(42), FieldValues::new());
        assert!(store.finalize_row(key, &saved));
        let row = store.row(key).expect("finalized");
        assert_eq!(row.id, RowId(42));
        assert!(!row.ephemeral.loading);
    }

    #[test]
    fn cell_updates_return_previous_value() {
        let mut store = filled();
        let key = store.rows()[2].key();
        let previous = store.set_cell_value(key, "field_1", json!("new"));
        assert_eq!(previous, Some(Some(json!(2))));
        assert_eq!(store.row(key).unwrap().value("field_1"), Some(&json!("new")));
        assert_eq!(store.set_cell_value(RowKey(999_999), "field_1", json!(1)), None);
    }

    #[test]
    fn restoring_absent_cell_removes_field() {
        let mut store = filled();
        let key = store.rows()[2].key();
        let previous = store
            .set_cell_value(key, "field_9", json!("draft"))
            .expect("buffered");
        assert_eq!(previous, None);

        assert!(store.restore_cell(key, "field_9", previous));
        assert_eq!(store.row(key).unwrap().value("field_9"), None);
        assert!(store.restore_cell(key, "field_1", Some(json!(7))));
        assert_eq!(store.row(key).unwrap().value("field_1"), Some(&json!(7)));
        assert!(!store.restore_cell(RowKey(999_999), "field_1", None));
    }

    #[test]
    fn update_rows_merges_by_id_and_ignores_strangers() {
        let mut store = filled();
        let mut values = FieldValues::new();
        values.insert("field_2".into(), json!("computed"));
        let merged = store.update_rows(&[
            Row::new(RowId(1), values.clone()),
            Row::new(RowId(500), values),
        ]);
        assert_eq!(merged, 1);
        assert_eq!(
            store.find_by_id(RowId(1)).unwrap().value("field_2"),
            Some(&json!("computed"))
        );
    }

    #[test]
    fn add_field_touches_every_buffered_row() {
        let mut store = filled();
        store.add_field("field_7", json!(false));
        assert!(store
            .rows()
            .iter()
            .all(|row| row.value("field_7") == Some(&json!(false))));
    }

    #[test]
    fn clear_resets_to_zero_state() {
        let mut store = filled();
        let revision = store.revision();
        store.clear();
        assert_eq!(store.window(), BufferWindow::default());
        assert!(store.rows().is_empty());
        assert!(store.revision() > revision);
    }
}
