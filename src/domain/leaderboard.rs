//! Leaderboard rows, kind-specific aggregates and orderings.

use super::{EntityId, EntityKind, RawAmount, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind-specific aggregates carried alongside the point totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aggregates {
    #[serde(rename_all = "camelCase")]
    Brand {
        gold_count: i64,
        silver_count: i64,
        bronze_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    User { vote_count: i64, power_level: i64 },
}

impl Aggregates {
    pub fn kind(&self) -> EntityKind {
        match self {
            Aggregates::Brand { .. } => EntityKind::Brand,
            Aggregates::User { .. } => EntityKind::User,
        }
    }

    /// Value of an integer sort field, if the field belongs to this kind.
    pub fn sort_value(&self, field: SortField) -> Option<i64> {
        match (self, field) {
            (Aggregates::Brand { gold_count, .. }, SortField::GoldCount) => Some(*gold_count),
            (Aggregates::Brand { silver_count, .. }, SortField::SilverCount) => Some(*silver_count),
            (Aggregates::Brand { bronze_count, .. }, SortField::BronzeCount) => Some(*bronze_count),
            (Aggregates::User { vote_count, .. }, SortField::VoteCount) => Some(*vote_count),
            (Aggregates::User { power_level, .. }, SortField::PowerLevel) => Some(*power_level),
            _ => None,
        }
    }
}

/// Live ledger aggregate for one entity, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAggregate {
    pub id: EntityId,
    pub current_points: RawAmount,
    pub aggregates: Aggregates,
}

/// One materialized leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub id: EntityId,
    pub all_time_points: f64,
    pub baseline_points: f64,
    pub current_points: f64,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub updated_at_ms: TimeMs,
}

/// Current-period live values for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodStanding {
    pub period_id: i64,
    pub points: RawAmount,
    pub rank: Option<i64>,
}

/// Display fields supplied by the external profile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetadata {
    pub display_name: String,
    pub image_url: Option<String>,
}

impl DisplayMetadata {
    pub fn placeholder(kind: EntityKind, id: EntityId) -> Self {
        Self {
            display_name: format!("{} #{}", kind.label(), id),
            image_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    AllTimePoints,
    CurrentPoints,
    Id,
    GoldCount,
    SilverCount,
    BronzeCount,
    VoteCount,
    PowerLevel,
}

impl SortField {
    /// The single ordering held by the materialized snapshot.
    pub const CANONICAL: SortField = SortField::AllTimePoints;

    pub fn applies_to(&self, kind: EntityKind) -> bool {
        match self {
            SortField::AllTimePoints | SortField::CurrentPoints | SortField::Id => true,
            SortField::GoldCount | SortField::SilverCount | SortField::BronzeCount => {
                kind == EntityKind::Brand
            }
            SortField::VoteCount | SortField::PowerLevel => kind == EntityKind::User,
        }
    }

    /// Whether the live aggregation can order and paginate by this field in SQL.
    ///
    /// Point fields depend on the in-process baseline and exact fixed-point parsing.
    pub fn is_sql_orderable(&self) -> bool {
        !matches!(self, SortField::AllTimePoints | SortField::CurrentPoints)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::AllTimePoints => "allTimePoints",
            SortField::CurrentPoints => "currentPoints",
            SortField::Id => "id",
            SortField::GoldCount => "goldCount",
            SortField::SilverCount => "silverCount",
            SortField::BronzeCount => "bronzeCount",
            SortField::VoteCount => "voteCount",
            SortField::PowerLevel => "powerLevel",
        }
    }
}

impl FromStr for SortField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alltimepoints" => Ok(SortField::AllTimePoints),
            "currentpoints" => Ok(SortField::CurrentPoints),
            "id" => Ok(SortField::Id),
            "goldcount" => Ok(SortField::GoldCount),
            "silvercount" => Ok(SortField::SilverCount),
            "bronzecount" => Ok(SortField::BronzeCount),
            "votecount" => Ok(SortField::VoteCount),
            "powerlevel" => Ok(SortField::PowerLevel),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Apply this direction to an ascending comparison.
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(()),
        }
    }
}
