//! Pure computation for point totals: fixed-point normalization and baseline merging.

pub mod baseline;
pub mod normalizer;

pub use baseline::{BaselineError, BaselineMap, BaselineMerger, BaselineSource};
pub use normalizer::{normalize, normalize_str, AmountError};
