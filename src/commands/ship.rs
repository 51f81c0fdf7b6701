use anyhow::Result;
use colored::Colorize;
use scoring_gateway::{
    config, init_tracing,
    shipper::{AmqpConnector, FlushPolicy, LogShipper, ReconnectPolicy},
    signals::setup_signal_handlers,
    storage::{self, PartitionedWriter},
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Execute the ship command
///
/// Runs the log shipper until SIGTERM/SIGINT, flushing whatever is buffered on
/// the way out.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    println!("{}", "Starting log shipper...".green());

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let shutdown_rx = shutdown_tx.subscribe();

    let store = storage::build_store(&cfg.storage).await;
    let writer = PartitionedWriter::new(store, cfg.storage.prefix.clone());
    let policy = FlushPolicy::from(&cfg.shipper);

    info!(
        queue = %cfg.broker.queue,
        bucket = %cfg.storage.bucket,
        batch_size = policy.max_messages,
        flush_interval_secs = policy.max_interval.as_secs(),
        "Starting log shipper"
    );

    let shipper = LogShipper::new(
        Arc::new(AmqpConnector::new(&cfg.broker)),
        writer,
        policy,
        ReconnectPolicy::new(cfg.broker.reconnect_delay()),
    );
    shipper.run(shutdown_rx).await;

    signal_handle.await?;
    info!("Log shipper exited");

    Ok(())
}
