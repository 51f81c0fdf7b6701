use anyhow::Result;
use colored::Colorize;
use scoring_gateway::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the serve command
///
/// Loads configuration, initializes logging, then blocks in the server until a
/// shutdown signal has been handled.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    println!("{}", "Starting scoring gateway...".green());
    info!(config = %config_path.display(), "Starting scoring gateway");

    server::start_server(cfg).await
}
