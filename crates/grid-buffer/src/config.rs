use std::time::Duration;

use crate::error::{GridError, GridResult};

pub const DEFAULT_ROW_HEIGHT: f64 = 33.0;
pub const DEFAULT_ROW_PADDING: usize = 16;
pub const DEFAULT_BUFFER_REQUEST_SIZE: usize = 40;
pub const DEFAULT_SCROLL_QUIESCENCE: Duration = Duration::from_millis(100);

/// Geometry and paging parameters of a grid view.
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// Height of one row in pixels.
    pub row_height: f64,
    /// Rows kept visible above and below the middle row.
    pub row_padding: usize,
    /// Page size; buffer boundaries are always multiples of it.
    pub buffer_request_size: usize,
    /// Minimum spacing between two processed scroll events.
    pub scroll_quiescence: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            row_height: DEFAULT_ROW_HEIGHT,
            row_padding: DEFAULT_ROW_PADDING,
            buffer_request_size: DEFAULT_BUFFER_REQUEST_SIZE,
            scroll_quiescence: DEFAULT_SCROLL_QUIESCENCE,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> GridResult<()> {
        if !(self.row_height.is_finite() && self.row_height > 0.0) {
            return Err(GridError::InvalidConfig(format!(
                "row height must be positive, got {}",
                self.row_height
            )));
        }
        if self.buffer_request_size == 0 {
            return Err(GridError::InvalidConfig(
                "buffer request size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Rows fetched by the initial fill.
    pub fn initial_limit(&self) -> usize {
        self.buffer_request_size * 2
    }

    pub fn placeholder_height(&self, count: usize) -> f64 {
        count as f64 * self.row_height
    }
}
