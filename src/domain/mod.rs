//! Domain types for the podium leaderboards.
//!
//! This module provides:
//! - Primitives: TimeMs, EntityId, EntityKind
//! - Raw fixed-point amounts and their column decoding
//! - Leaderboard rows, aggregates and sort orderings

pub mod amount;
pub mod leaderboard;
pub mod primitives;

pub use amount::{RawAmount, ValidationError};
pub use leaderboard::{
    Aggregates, DisplayMetadata, EntityAggregate, PeriodStanding, SnapshotRow, SortField,
    SortOrder,
};
pub use primitives::{EntityId, EntityIdParseError, EntityKind, TimeMs};
