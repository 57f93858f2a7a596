//! Exact parsing and formatting of user-entered Wei amounts.
//!
//! Amounts arrive as strings typed by a user: blank, `0x`-prefixed hex, or plain decimal.
//! They are converted to [`U256`] without any precision loss. Validity must be checked with
//! [`is_valid`] before calling [`parse`]; [`parse`] never coerces malformed input to zero.

use alloy::primitives::U256;

use crate::error::RecoveryError;

/// Returns whether `raw` is an acceptable amount string.
///
/// - blank (after trimming) is valid and means zero,
/// - a leading `-` is never valid,
/// - `0x`/`0X` followed by one or more hex digits is valid,
/// - otherwise one or more decimal digits is valid.
pub fn is_valid(raw: &str) -> bool {
    let s = raw.trim();
    if s.is_empty() {
        return true;
    }
    if s.starts_with('-') {
        return false;
    }
    match strip_hex_prefix(s) {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()),
        None => s.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// Parses `raw` into an exact integer amount. Blank input parses to zero.
///
/// # Errors
/// [`RecoveryError::InvalidAmount`] when the string fails [`is_valid`] or does not fit in 256 bits.
pub fn parse(raw: &str) -> Result<U256, RecoveryError> {
    if !is_valid(raw) {
        return Err(RecoveryError::InvalidAmount(raw.to_string()));
    }
    let s = raw.trim();
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let parsed = match strip_hex_prefix(s) {
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(s, 10),
    };
    parsed.map_err(|_| RecoveryError::InvalidAmount(raw.to_string()))
}

/// Parses `raw`, treating any invalid input as zero.
///
/// Used only where a derived value is recomputed on every keystroke (the service fee cache);
/// batch construction rejects invalid amounts instead.
pub fn parse_or_zero(raw: &str) -> U256 {
    parse(raw).unwrap_or(U256::ZERO)
}

/// Renders an amount as lowercase `0x`-prefixed hex. Zero renders as `0x0`.
pub fn format_hex(amount: U256) -> String {
    format!("{amount:#x}")
}

/// Renders an amount as a plain decimal string.
pub fn format_decimal(amount: U256) -> String {
    amount.to_string()
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}
