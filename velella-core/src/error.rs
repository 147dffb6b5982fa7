//! Structured error types shared by the Velella crates.

use thiserror::Error;

/// Unified error type for all Velella operations.
#[derive(Debug, Error)]
pub enum VelellaError {
    /// Malformed input data (e.g. a bad Newick string).
    #[error("parse error: {0}")]
    Parse(String),

    /// Bad arguments or out-of-range values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the Velella crates.
pub type Result<T> = std::result::Result<T, VelellaError>;
