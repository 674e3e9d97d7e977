//! Shared data structures and utilities for the graphing bot
//!
//! This crate contains the configuration schema, zone-aware time primitives,
//! the common error taxonomy and upload validation helpers used by the bot
//! service crate.

pub mod config;
pub mod defaults;
pub mod time;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{BotConfig, GraphKind, SchedulingConfig};
pub use time::{Clock, TimestampStyle};
pub use utils::{format_file_size, validate_upload_file};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the bot
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State persistence error: {0}")]
    State(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("Transient service error: {0}")]
    TransientService(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Permanent service error: {0}")]
    PermanentService(String),
}

#[cfg(test)]
mod tests;
