//! Shared primitives for the Velella phylogenetics crates.
//!
//! `velella-core` provides the foundation the domain crates build on:
//!
//! - **Error types** — [`VelellaError`] and [`Result`] for structured error handling
//! - **Log-space probability** — [`LogProb`] for underflow-free likelihood math
//! - **Traits** — [`Scored`] and [`Summarizable`] abstractions

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{Result, VelellaError};
pub use prob::LogProb;
pub use traits::*;
