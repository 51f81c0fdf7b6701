pub mod health;
pub mod metrics_handler;
pub mod predict;

pub use predict::AppState;
