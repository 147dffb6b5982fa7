//! Cross-crate trait definitions.

/// A type that carries a numeric score (log-likelihood, fit score, etc.).
pub trait Scored {
    /// The score value; higher is better.
    fn score(&self) -> f64;
}

/// A type that can produce a one-line summary of its contents.
pub trait Summarizable {
    /// A human-readable summary suitable for log output.
    fn summary(&self) -> String;
}
