//! Command implementations for the CLI
//!
//! - serve: Run the scoring gateway
//! - ship: Run the log shipper
//! - check: Validate configuration

pub mod check;
pub mod serve;
pub mod ship;
