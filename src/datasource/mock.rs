//! Mock metadata enricher for testing without network calls.

use super::{EnrichmentError, MetadataEnricher};
use crate::domain::{DisplayMetadata, EntityId, EntityKind};
use async_trait::async_trait;
use std::collections::HashMap;

/// Mock enricher that returns predefined profiles, or always fails.
#[derive(Debug, Clone, Default)]
pub struct MockMetadataEnricher {
    profiles: HashMap<(EntityKind, EntityId), DisplayMetadata>,
    fail: bool,
}

impl MockMetadataEnricher {
    /// Create a new mock enricher with no profiles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile.
    pub fn with_profile(
        mut self,
        kind: EntityKind,
        id: EntityId,
        display_name: &str,
        image_url: Option<&str>,
    ) -> Self {
        self.profiles.insert(
            (kind, id),
            DisplayMetadata {
                display_name: display_name.to_string(),
                image_url: image_url.map(str::to_string),
            },
        );
        self
    }

    /// Make every lookup fail.
    pub fn failing() -> Self {
        Self {
            profiles: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl MetadataEnricher for MockMetadataEnricher {
    async fn lookup(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, DisplayMetadata>, EnrichmentError> {
        if self.fail {
            return Err(EnrichmentError::HttpError {
                status: 503,
                message: "Server error".to_string(),
            });
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.profiles.get(&(kind, *id)).map(|p| (*id, p.clone())))
            .collect())
    }
}
