pub mod audit;
pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod inference;
pub mod metrics;
pub mod models;
pub mod server;
pub mod shipper;
pub mod signals;
pub mod storage;
pub mod transform;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `level`. `format = "json"` switches to one JSON object per line.
///
/// Note: This function can only be called once.
pub fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
