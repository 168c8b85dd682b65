//! Logging setup for the `sqlconnect` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the application.

use crate::core::{Result, SqlconnectError};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maps CLI flags to a level: quiet wins, then 0=INFO, 1=DEBUG, 2+=TRACE.
pub fn level_for(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Installs a stderr `fmt` subscriber.
///
/// `RUST_LOG`, when set, replaces the level derived from the flags.
///
/// ```rust,no_run
/// sqlconnect::logging::init_logging(1, false).expect("logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose, quiet).as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| SqlconnectError::Logging(format!("Failed to initialize logging: {e}")))
}
