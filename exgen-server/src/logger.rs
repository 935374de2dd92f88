//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the configuration is loaded.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence when set; `level` (e.g. `"info"`,
/// `"exgen_core=debug"`) is the fallback.
pub fn init(level: &str) -> Result<(), AppError> {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(level))
		.map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?;

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init()
		.map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

	Ok(())
}
