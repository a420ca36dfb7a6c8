use grid_buffer::{GridError, RowId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Grid(#[from] GridError),
    #[error("row {row_id} is not in the window at scroll offset {scroll_top}px; pass --at to scroll to it")]
    RowNotBuffered { row_id: RowId, scroll_top: f64 },
    #[error("invalid field assignment '{0}', expected field_<id>=<json>")]
    InvalidAssignment(String),
    #[error("output failed: {0}")]
    Output(#[from] serde_json::Error),
}
