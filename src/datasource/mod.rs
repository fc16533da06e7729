//! Display metadata lookups against the external social-profile service.
//!
//! Results are used only to decorate leaderboard rows. Callers treat any failure as
//! "no metadata" and fall back to placeholders.

use crate::domain::{DisplayMetadata, EntityId, EntityKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

pub mod mock;
pub mod profiles;

pub use mock::MockMetadataEnricher;
pub use profiles::HttpMetadataEnricher;

/// Looks up display names and avatars for a page of entity ids.
///
/// Implementations may return a partial map; ids absent from the result get placeholders.
#[async_trait]
pub trait MetadataEnricher: Send + Sync + fmt::Debug {
    async fn lookup(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, DisplayMetadata>, EnrichmentError>;
}

/// Enricher used when no profile service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetadataEnricher;

#[async_trait]
impl MetadataEnricher for NoopMetadataEnricher {
    async fn lookup(
        &self,
        _kind: EntityKind,
        _ids: &[EntityId],
    ) -> Result<HashMap<EntityId, DisplayMetadata>, EnrichmentError> {
        Ok(HashMap::new())
    }
}

/// Error type for metadata lookups.
#[derive(Debug, Clone)]
pub enum EnrichmentError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded
    RateLimited,
}

impl fmt::Display for EnrichmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichmentError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            EnrichmentError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            EnrichmentError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            EnrichmentError::RateLimited => write!(f, "Rate limited"),
        }
    }
}

impl std::error::Error for EnrichmentError {}
