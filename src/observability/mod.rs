//! # Observability
//!
//! Logging initialisation for the gateway. Logs always go to stderr so the
//! stdio transport keeps stdout for protocol frames.

pub mod logging;

pub use logging::log_config_info;

use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `verbose` forces debug output.
pub fn init_logging(config: &ObservabilityConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.json_logs { builder.json().try_init() } else { builder.try_init() };

    result.map_err(|e| Error::internal(format!("Failed to initialise logging: {}", e)))
}
