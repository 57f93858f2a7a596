//! Service fee arithmetic.
//!
//! The configured percentage is a float, but it is converted once into a parts-per-1000
//! numerator and then applied with integer floor division, so no floating point ever touches
//! an amount.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::RecoveryError;

/// Denominator of the fixed-point fee ratio.
pub const FEE_DENOMINATOR: u64 = 1000;

/// Fee settings threaded through every computation that needs them.
///
/// This is a plain value: changing the fee means building a new `FeeConfig` and handing it
/// to the store, which rebinds every wallet to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub enabled: bool,
    /// Fraction in `[0, 1]`, e.g. `0.2` for 20%.
    pub fee_percentage: f64,
    /// Where the fee share of recovered tokens is sent.
    pub fee_collector: Option<Address>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fee_percentage: 0.2,
            fee_collector: None,
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if !self.fee_percentage.is_finite() || !(0.0..=1.0).contains(&self.fee_percentage) {
            return Err(RecoveryError::Config(format!(
                "fee_percentage must be within [0, 1], got {}",
                self.fee_percentage
            )));
        }
        Ok(())
    }

    /// Parts-per-1000 numerator: `round(fee_percentage * 1000)`, clamped to `[0, 1000]`.
    pub fn numerator(&self) -> u64 {
        let scaled = (self.fee_percentage * FEE_DENOMINATOR as f64).round();
        if scaled.is_nan() || scaled <= 0.0 {
            0
        } else if scaled >= FEE_DENOMINATOR as f64 {
            FEE_DENOMINATOR
        } else {
            scaled as u64
        }
    }

    /// `floor(base * numerator / 1000)` when enabled, zero otherwise.
    pub fn service_fee(&self, base: U256) -> U256 {
        if !self.enabled {
            return U256::ZERO;
        }
        apply_ratio(base, self.numerator())
    }

    /// `base - fee`, never negative.
    pub fn net_amount(&self, base: U256) -> U256 {
        base.saturating_sub(self.service_fee(base))
    }
}

/// Exact `floor(amount * numerator / FEE_DENOMINATOR)` for `numerator <= FEE_DENOMINATOR`.
///
/// Splits `amount` into quotient and remainder so the product cannot overflow 256 bits.
pub fn apply_ratio(amount: U256, numerator: u64) -> U256 {
    let denominator = U256::from(FEE_DENOMINATOR);
    let numerator = U256::from(numerator.min(FEE_DENOMINATOR));
    let quotient = amount / denominator;
    let remainder = amount % denominator;
    quotient * numerator + remainder * numerator / denominator
}
