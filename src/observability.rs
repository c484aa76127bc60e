//! Logging initialization.

use crate::config::ObservabilityConfig;
use crate::error::{Result, TalusError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize structured logging. Safe to call once per process.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| TalusError::Internal(format!("failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| TalusError::Internal(format!("failed to init logging: {}", e)))?;
    }
    Ok(())
}
