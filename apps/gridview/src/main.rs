mod cli;
mod config;
mod error;
mod logging;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::logging::LogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("initializing logging")?;

    let cfg = AppConfig::from_env().with_overrides(cli.api_url.clone(), cli.token.clone());
    debug!(
        api_url = %cfg.api_url,
        token = cfg.token.is_some(),
        view_id = cli.view_id,
        table_id = cli.table_id,
        row_height = cfg.grid.row_height,
        buffer_request_size = cfg.grid.buffer_request_size,
        "starting gridview"
    );
    cli::run(cli, cfg).await?;
    Ok(())
}
