//! Fixed-point token amount normalization.
//!
//! Amounts are non-negative integers scaled by 10^18. The whole part is split off as an
//! integer before any float conversion so it stays exact up to 2^53 - 1.

use crate::domain::RawAmount;
use thiserror::Error;

/// Number of fractional decimal digits in a fixed-point amount.
pub const SCALE_DIGITS: usize = 18;

const SCALE: f64 = 1e18;

/// Largest whole-unit value a double represents exactly.
pub const MAX_SAFE_WHOLE_UNITS: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("malformed amount: {0:?}")]
    Malformed(String),
    #[error("amount overflows safe integer range: {0}")]
    Overflow(String),
}

/// Convert a raw amount into display units.
///
/// Legacy numeric values are returned unchanged.
pub fn normalize(raw: &RawAmount) -> Result<f64, AmountError> {
    match raw {
        RawAmount::Numeric(value) => Ok(*value),
        RawAmount::Fixed(digits) => normalize_str(digits),
        RawAmount::Decimal(value) => {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(AmountError::Malformed(value.to_string()));
            }
            if !value.fract().is_zero() {
                return Err(AmountError::Malformed(value.to_string()));
            }
            normalize_str(&value.trunc().normalize().to_string())
        }
    }
}

/// Normalize an integer string scaled by 10^18.
pub fn normalize_str(s: &str) -> Result<f64, AmountError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Malformed(s.to_string()));
    }

    let (whole_digits, frac_digits) = s.split_at(s.len().saturating_sub(SCALE_DIGITS));
    let whole_digits = whole_digits.trim_start_matches('0');

    // 2^53 - 1 has 16 digits
    if whole_digits.len() > 16 {
        return Err(AmountError::Overflow(s.to_string()));
    }

    let whole = parse_digits(whole_digits, s)?;
    if whole > MAX_SAFE_WHOLE_UNITS {
        return Err(AmountError::Overflow(s.to_string()));
    }
    let frac = parse_digits(frac_digits, s)?;

    Ok(whole as f64 + frac as f64 / SCALE)
}

fn parse_digits(digits: &str, original: &str) -> Result<u64, AmountError> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse::<u64>()
        .map_err(|_| AmountError::Malformed(original.to_string()))
}
