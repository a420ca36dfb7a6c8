use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use grid_buffer::{
    FieldValues, GridSource, GridView, InMemoryRowService, Row, RowId, RowKey, RowService,
    TableId, ViewId, Viewport,
};
use row_client::RowClient;
use serde_json::Value;
use tracing::info;

use crate::config::AppConfig;
use crate::error::CliError;
use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "gridview")]
#[command(about = "Page through a grid view and edit its rows from the terminal")]
pub struct Cli {
    /// API root of the row service (overrides GRIDVIEW_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// API token (overrides GRIDVIEW_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long, env = "GRIDVIEW_VIEW_ID", default_value_t = 1)]
    pub view_id: u64,

    #[arg(long, env = "GRIDVIEW_TABLE_ID", default_value_t = 1)]
    pub table_id: u64,

    /// Height of the simulated scrolling element in pixels
    #[arg(long, default_value_t = 660.0)]
    pub viewport_height: f64,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Use an in-memory table with this many rows instead of the API
    #[arg(long, value_name = "ROWS")]
    pub demo: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the visible rows at each scroll offset
    Scroll {
        /// Scroll offsets in pixels
        #[arg(required = true)]
        positions: Vec<f64>,
    },

    /// Create a row
    Create {
        /// Field value, e.g. --value field_3='"hello"'
        #[arg(long = "value", value_parser = parse_assignment)]
        values: Vec<(String, Value)>,
    },

    /// Update one cell of a row
    Update {
        row_id: u64,
        field: String,
        #[arg(value_parser = parse_json)]
        value: Value,
        /// Scroll offset at which the row is buffered
        #[arg(long, default_value_t = 0.0)]
        at: f64,
    },

    /// Delete a row
    Delete {
        row_id: u64,
        /// Scroll offset at which the row is buffered
        #[arg(long, default_value_t = 0.0)]
        at: f64,
    },
}

/// Parses JSON, taking anything that is not valid JSON as a plain string.
fn parse_json(raw: &str) -> Result<Value, CliError> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

fn parse_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidAssignment(raw.to_string()))?;
    if field.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    }
    Ok((field.to_string(), parse_json(value)?))
}

pub async fn run(cli: Cli, cfg: AppConfig) -> Result<(), CliError> {
    let service: Arc<dyn RowService> = match cli.demo {
        Some(rows) => {
            info!(rows, "using in-memory demo table");
            Arc::new(InMemoryRowService::with_rows(rows))
        }
        None => {
            info!(api_url = %cfg.api_url, "using remote row service");
            Arc::new(RowClient::new(cfg.api_url.clone(), cfg.token.clone()))
        }
    };
    let height = cli.viewport_height;
    let view = GridView::new(cfg.grid.clone(), service)?;
    view.load(
        GridSource::new(ViewId(cli.view_id), TableId(cli.table_id)),
        height,
    )
    .await?;

    match cli.command {
        Command::Scroll { positions } => {
            for scroll_top in positions {
                let viewport = Viewport::new(scroll_top, height);
                view.fetch_by_scroll_top(viewport).await?;
                view.visible_by_scroll_top(Some(viewport));
                view.with_visible_rows(|rows| rows.iter().try_for_each(print_row))?;
                print_window(&view, scroll_top);
            }
        }
        Command::Create { values } => {
            let overrides: FieldValues = values.into_iter().collect();
            let key = view.create_row(&[], overrides).await?;
            print_key(&view, key)?;
        }
        Command::Update {
            row_id,
            field,
            value,
            at,
        } => {
            let key = locate(&view, RowId(row_id), Viewport::new(at, height)).await?;
            view.update_cell(key, &field, value).await?;
            print_key(&view, key)?;
        }
        Command::Delete { row_id, at } => {
            let key = locate(&view, RowId(row_id), Viewport::new(at, height)).await?;
            view.delete_row(key, at).await?;
            eprintln!("deleted row {row_id}; {} rows remain", view.count());
        }
    }
    view.close();
    Ok(())
}

async fn locate(view: &GridView, row_id: RowId, viewport: Viewport) -> Result<RowKey, CliError> {
    view.fetch_by_scroll_top(viewport).await?;
    view.find_by_id(row_id)
        .map(|row| row.key())
        .ok_or(CliError::RowNotBuffered {
            row_id,
            scroll_top: viewport.scroll_top,
        })
}

fn print_row(row: &Row) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(row)?);
    Ok(())
}

fn print_key(view: &GridView, key: RowKey) -> Result<(), CliError> {
    if let Some(row) = view.row(key) {
        print_row(&row)?;
    }
    Ok(())
}

fn print_window(view: &GridView, scroll_top: f64) {
    let window = view.window();
    eprintln!(
        "scroll_top={scroll_top} count={} buffer={}..{} visible={}..{} rows_top={} height={}",
        window.count,
        window.buffer_start,
        window.buffer_end(),
        window.rows_start,
        window.rows_end,
        window.rows_top,
        view.placeholder_height()
    );
}
