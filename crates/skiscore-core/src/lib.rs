pub mod config;
pub mod error;

pub use config::{Config, StorageConfig, TrackingConfig, ValidationResult};
pub use error::{AppError, ConfigError, DatabaseError, LocationError, RusqliteErrorExt};

use anyhow::Result;

/// Initialize logging for the SkiScore application.
///
/// Honours `RUST_LOG`; defaults to `info`. Logs go to stderr so stdout
/// stays free for command output.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("SkiScore core initialized");
    Ok(())
}
