//! Raw point amounts as they arrive from the ledger.
//!
//! Current-season balances are stored as 18-decimal fixed-point integers in an untyped
//! column. Rows written before the fixed-point migration hold plain numbers that are already
//! in display units.

use rust_decimal::Decimal as RustDecimal;
use std::fmt;
use thiserror::Error;

/// An undecoded point amount.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAmount {
    /// Integer string scaled by 10^18.
    Fixed(String),
    /// Fixed-point amount held as a decimal by library callers, scaled by 10^18 like
    /// `Fixed`. Must be integral. Column decoding never produces it.
    Decimal(RustDecimal),
    /// Legacy pre-normalized value, passed through unchanged.
    Numeric(f64),
}

impl RawAmount {
    pub fn fixed(s: impl Into<String>) -> Self {
        RawAmount::Fixed(s.into())
    }

    pub fn zero() -> Self {
        RawAmount::Fixed("0".to_string())
    }

    /// Decode a value read from an untyped SQLite column.
    ///
    /// `storage_type` is the result of `typeof(col)`; exactly one of `text`/`number`
    /// is expected to be populated for the matching storage class.
    pub fn decode_column(
        storage_type: &str,
        text: Option<String>,
        number: Option<f64>,
    ) -> Result<Self, ValidationError> {
        match storage_type {
            "text" => text
                .map(RawAmount::Fixed)
                .ok_or_else(|| ValidationError::new("points", "text column without text value")),
            "integer" | "real" => number
                .map(RawAmount::Numeric)
                .ok_or_else(|| ValidationError::new("points", "numeric column without value")),
            "null" => Ok(RawAmount::zero()),
            other => Err(ValidationError::new(
                "points",
                format!("unsupported storage class {}", other),
            )),
        }
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawAmount::Fixed(s) => write!(f, "{}", s),
            RawAmount::Decimal(d) => write!(f, "{}", d),
            RawAmount::Numeric(n) => write!(f, "{}", n),
        }
    }
}

/// A stored value did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
