use anyhow::Result;
use colored::Colorize;
use scoring_gateway::config::{self, StorageBackend};
use std::path::Path;

/// Execute the check command
///
/// Loads and validates the configuration without connecting to anything
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Checking configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {} ({})", "Logging".cyan(), cfg.server.log_level, cfg.server.log_format);
    println!();

    println!("  {}: {}", "Backend".cyan(), cfg.backend.base_url);
    println!(
        "    Model: {}{}",
        cfg.backend.model_name,
        cfg.backend
            .model_version
            .as_deref()
            .map(|v| format!(" (version {})", v))
            .unwrap_or_default()
    );
    println!("    Timeout: {} ms", cfg.backend.timeout_ms);
    println!();

    println!("  {}: {}", "Features".cyan(), cfg.features.order.len());
    for (idx, feature) in cfg.features.order.iter().enumerate() {
        println!("    {}. {}", idx, feature);
    }
    println!();

    println!("  {}: {}", "Queue".cyan(), cfg.broker.queue);
    println!(
        "    Shipper flush: {} messages or {} s",
        cfg.shipper.batch_size, cfg.shipper.flush_interval_seconds
    );
    println!();

    let backend = match cfg.storage.backend {
        StorageBackend::S3 => "s3".normal(),
        StorageBackend::Memory => "memory (not persisted)".red(),
    };
    println!("  {}: {}", "Storage".cyan(), backend);
    println!(
        "    Bucket: {}{}",
        cfg.storage.bucket,
        cfg.storage
            .prefix
            .as_deref()
            .map(|p| format!("/{}", p))
            .unwrap_or_default()
    );
    if let Some(endpoint) = &cfg.storage.endpoint {
        println!("    Endpoint: {}", endpoint);
    }
    println!("    Upload timeout: {} ms", cfg.storage.upload_timeout_ms);

    Ok(())
}
