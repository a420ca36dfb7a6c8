//! Index arithmetic for the buffer window.
//!
//! All functions here are pure. Given a scroll position they answer three
//! questions:
//!
//! 1. which rows the user can see ([`visible_range`]),
//! 2. which rows should be held in memory ([`buffer_range`]), and
//! 3. how the current buffer must be changed to become that range
//!    ([`plan_window`]): how many rows to add or drop at each end and which
//!    rows to fetch.
//!
//! Buffer boundaries are rounded outward to multiples of the request size so
//! that small scroll movements map onto the same pages and do not cause a
//! fetch.
//!
//! ```
//! # use grid_buffer::window::{buffer_range, visible_range, IndexRange, Viewport};
//! # use grid_buffer::GridConfig;
//! let cfg = GridConfig::default();
//! let visible = visible_range(Viewport::new(16_203.0, 660.0), &cfg, 1000);
//! assert_eq!(visible, IndexRange::new(484, 517));
//! assert_eq!(buffer_range(visible, 40, 1000), IndexRange::new(440, 560));
//! ```

use crate::config::GridConfig;

/// Half-open range of absolute row indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub const EMPTY: IndexRange = IndexRange { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        Self { start, end }
    }

    pub fn with_len(start: usize, len: usize) -> Self {
        Self::new(start, start + len)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Scroll position and height of the scrolling element, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, height: f64) -> Self {
        Self { scroll_top, height }
    }
}

/// Index of the row under the vertical centre of the viewport, clamped to the
/// table. Returns 0 for an empty table.
pub fn middle_index(viewport: Viewport, row_height: f64, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let middle = viewport.scroll_top + viewport.height / 2.0;
    let raw = (middle / row_height).ceil() - 1.0;
    // NaN and negatives both land on the first row
    if raw.is_nan() || raw <= 0.0 {
        return 0;
    }
    (raw as usize).min(count - 1)
}

/// Rows within `row_padding` of the middle row.
pub fn visible_range(viewport: Viewport, cfg: &GridConfig, count: usize) -> IndexRange {
    if count == 0 {
        return IndexRange::EMPTY;
    }
    let middle = middle_index(viewport, cfg.row_height, count);
    IndexRange::new(
        middle.saturating_sub(cfg.row_padding),
        (middle + cfg.row_padding + 1).min(count),
    )
}

/// The visible range widened by one page on each side, with both ends rounded
/// outward to a page boundary and clamped to `[0, count]`.
pub fn buffer_range(visible: IndexRange, page: usize, count: usize) -> IndexRange {
    debug_assert!(page > 0, "page size must be positive");
    if count == 0 {
        return IndexRange::EMPTY;
    }
    let page = page as i64;
    let start = (visible.start as i64 - page).div_euclid(page) * page;
    let end = (visible.end as i64 + 2 * page - 1) / page * page;
    IndexRange::new(start.max(0) as usize, (end as usize).min(count))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Up,
}

/// How to move the buffer from its current range to the desired one.
///
/// `prepend`/`append` are signed row counts: positive values add rows taken
/// from the fetched page, negative values drop that many rows from the
/// corresponding end. Applying both to the current buffer yields exactly
/// `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub direction: Direction,
    pub target: IndexRange,
    pub prepend: isize,
    pub append: isize,
    /// Rows to fetch. Never overlaps rows already held.
    pub request: IndexRange,
    /// The desired range also grows at the start while moving down. Only the
    /// tail is planned here; the head is picked up by the next plan.
    pub deferred: bool,
}

/// Plans the transition from `current` to `desired`. Returns `None` when no
/// rows need to be fetched.
pub fn plan_window(desired: IndexRange, current: IndexRange) -> Option<WindowPlan> {
    let cs = current.start as isize;
    let ce = current.end as isize;
    let held = current.len() as isize;
    let ts = desired.start as isize;
    let te = desired.end as isize;

    let down = ts > cs || te > ce;
    let up = ts < cs || te < ce;

    if down {
        let mut start = ts;
        let mut prepend = (cs - ts).max(-held);
        let mut deferred = false;
        if prepend > 0 {
            start = cs;
            prepend = 0;
            deferred = true;
        }
        let append = (te - ce).min(te - start);
        if append <= 0 {
            return None;
        }
        let offset = ce.max(start) as usize;
        Some(WindowPlan {
            direction: Direction::Down,
            target: IndexRange::new(start as usize, desired.end),
            prepend,
            append,
            request: IndexRange::with_len(offset, append as usize),
            deferred,
        })
    } else if up {
        let prepend = (cs - ts).min(te - ts);
        let append = (te - ce).max(-held);
        if prepend <= 0 {
            return None;
        }
        Some(WindowPlan {
            direction: Direction::Up,
            target: desired,
            prepend,
            append,
            request: IndexRange::with_len(desired.start, prepend as usize),
            deferred: false,
        })
    } else {
        None
    }
}

/// Visible rows expressed relative to the buffer, plus the pixel offset of the
/// first of them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisibleSlice {
    pub start: usize,
    pub end: usize,
    pub top: f64,
}

pub fn visible_slice(visible: IndexRange, buffer: IndexRange, row_height: f64) -> VisibleSlice {
    let start = visible.start.max(buffer.start).min(buffer.end) - buffer.start;
    let end = visible.end.min(buffer.end).max(buffer.start) - buffer.start;
    VisibleSlice {
        start,
        end,
        top: visible.start.min(buffer.end) as f64 * row_height,
    }
}
