/// Core Module for sqlconnect
///
/// Shared infrastructure used by every other module: the database session
/// layer and the error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, SqlconnectError};
