//! Log-space probability arithmetic.
//!
//! [`LogProb`] stores a probability as its natural logarithm so that long
//! chains of small per-node probabilities (as in reconciliation likelihoods)
//! can be accumulated without underflow.

use crate::{Result, VelellaError};

/// A probability stored as `ln(p)`.
///
/// Values are ≤ 0, with `0.0` meaning certainty and negative infinity
/// meaning impossibility.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct LogProb(pub f64);

impl LogProb {
    /// Wrap a raw probability in `(0, 1]`.
    pub fn from_prob(p: f64) -> Result<Self> {
        if p <= 0.0 || p > 1.0 {
            return Err(VelellaError::InvalidInput(format!(
                "LogProb::from_prob: p must be in (0, 1], got {p}"
            )));
        }
        Ok(Self(p.ln()))
    }

    /// The certain event, `ln(1) = 0`.
    pub const fn certain() -> Self {
        Self(0.0)
    }

    /// The impossible event, `ln(0) = -inf`.
    pub const fn impossible() -> Self {
        Self(f64::NEG_INFINITY)
    }

    /// The stored log value.
    pub fn ln_value(self) -> f64 {
        self.0
    }

    /// Convert back to a raw probability.
    pub fn to_prob(self) -> f64 {
        self.0.exp()
    }

    /// Product of two probabilities (log-space addition).
    pub fn ln_mul(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Sum of two probabilities via log-sum-exp.
    pub fn ln_add(self, other: Self) -> Self {
        if self.0 == f64::NEG_INFINITY {
            return other;
        }
        if other.0 == f64::NEG_INFINITY {
            return self;
        }
        let (hi, lo) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        Self(hi + (lo - hi).exp().ln_1p())
    }
}
