//! Grid buffer: windowed row cache backing a scrolling grid view.
//!
//! Responsibilities:
//! - computing which slice of a server-side table should be held in memory for
//!   a given scroll position (see [`window`])
//! - fetching only the missing delta, cancelling superseded fetches
//! - splicing pages into a contiguous buffer and exposing the visible slice
//! - coalescing bursts of scroll events
//! - optimistic create/update/delete of rows held by the buffer

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod grid;
mod mutation;
pub mod row;
pub mod service;
pub mod store;
pub mod window;

pub use config::GridConfig;
pub use error::{GridError, GridResult};
pub use grid::{GridSource, GridView};
pub use row::{Field, FieldKind, FieldValues, Row, RowId, RowKey, RowPage, TableId, ViewId};
pub use service::{InMemoryRowService, RowService, ServiceError, ServiceOp};
pub use store::{BufferStore, BufferWindow, GridEvent};
pub use window::{IndexRange, Viewport};
