//! Domain primitives: TimeMs, EntityId, EntityKind.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Saturating offset by a number of milliseconds.
    pub fn plus_ms(&self, ms: i64) -> Self {
        TimeMs(self.0.saturating_add(ms))
    }
}

/// Positive entity identifier shared by brands and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity id: {0}")]
pub struct EntityIdParseError(pub String);

impl EntityId {
    /// Create an EntityId, rejecting zero and negative values.
    pub fn new(id: i64) -> Result<Self, EntityIdParseError> {
        if id > 0 {
            Ok(EntityId(id))
        } else {
            Err(EntityIdParseError(id.to_string()))
        }
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl FromStr for EntityId {
    type Err = EntityIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let id = trimmed
            .parse::<i64>()
            .map_err(|_| EntityIdParseError(trimmed.to_string()))?;
        EntityId::new(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two ranked entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Brand,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Brand => "brand",
            EntityKind::User => "user",
        }
    }

    /// Key of this kind's row in the snapshot meta table.
    pub fn cache_name(&self) -> &'static str {
        match self {
            EntityKind::Brand => "brand_leaderboard",
            EntityKind::User => "user_leaderboard",
        }
    }

    /// Human-readable label used for placeholder display names.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Brand => "Brand",
            EntityKind::User => "User",
        }
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brand" | "brands" => Ok(EntityKind::Brand),
            "user" | "users" => Ok(EntityKind::User),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
