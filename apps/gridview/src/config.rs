use std::time::Duration;

use grid_buffer::GridConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub grid: GridConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; unparsable numbers fall back to the
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup("GRIDVIEW_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let token = lookup("GRIDVIEW_TOKEN").filter(|token| !token.is_empty());
        let defaults = GridConfig::default();
        let row_height = lookup("GRIDVIEW_ROW_HEIGHT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.row_height);
        let row_padding = lookup("GRIDVIEW_ROW_PADDING")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.row_padding);
        let buffer_request_size = lookup("GRIDVIEW_BUFFER_REQUEST_SIZE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.buffer_request_size);
        let scroll_quiescence = lookup("GRIDVIEW_SCROLL_QUIESCENCE_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.scroll_quiescence);
        Self {
            api_url,
            token,
            grid: GridConfig {
                row_height,
                row_padding,
                buffer_request_size,
                scroll_quiescence,
            },
        }
    }

    /// Applies command line overrides.
    pub fn with_overrides(mut self, api_url: Option<String>, token: Option<String>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        if token.is_some() {
            self.token = token;
        }
        self
    }
}
