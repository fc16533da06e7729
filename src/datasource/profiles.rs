//! HTTP client for the social-profile service.

use super::{EnrichmentError, MetadataEnricher};
use crate::domain::{DisplayMetadata, EntityId, EntityKind};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Profile service client posting id batches to `{base_url}/profiles`.
#[derive(Debug, Clone)]
pub struct HttpMetadataEnricher {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpMetadataEnricher {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(5),
        }
    }

    /// Bound the total time spent retrying one lookup.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn post_profiles(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, EnrichmentError> {
        let url = format!("{}/profiles", self.base_url);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(EnrichmentError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(EnrichmentError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(EnrichmentError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(EnrichmentError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(EnrichmentError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl MetadataEnricher for HttpMetadataEnricher {
    async fn lookup(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, DisplayMetadata>, EnrichmentError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        debug!("Fetching profiles for kind={}, ids={}", kind, ids.len());

        let payload = serde_json::json!({
            "kind": kind.as_str(),
            "ids": ids.iter().map(|id| id.as_i64()).collect::<Vec<_>>(),
        });

        let response = self.post_profiles(payload).await?;
        parse_profiles(&response)
    }
}

/// Parse a `[{id, displayName, imageUrl}]` response, skipping malformed entries.
fn parse_profiles(
    response: &serde_json::Value,
) -> Result<HashMap<EntityId, DisplayMetadata>, EnrichmentError> {
    let entries = response
        .as_array()
        .ok_or_else(|| EnrichmentError::ParseError("Expected array response".to_string()))?;

    let mut profiles = HashMap::with_capacity(entries.len());
    for entry in entries {
        match parse_profile(entry) {
            Ok((id, metadata)) => {
                profiles.insert(id, metadata);
            }
            Err(e) => {
                warn!("Failed to parse profile: {}", e);
            }
        }
    }
    Ok(profiles)
}

fn parse_profile(
    entry: &serde_json::Value,
) -> Result<(EntityId, DisplayMetadata), EnrichmentError> {
    let id = entry
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| EnrichmentError::ParseError("Missing id field".to_string()))?;
    let id = EntityId::new(id).map_err(|e| EnrichmentError::ParseError(e.to_string()))?;

    let display_name = entry
        .get("displayName")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| EnrichmentError::ParseError("Missing displayName field".to_string()))?
        .to_string();

    let image_url = entry
        .get("imageUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok((
        id,
        DisplayMetadata {
            display_name,
            image_url,
        },
    ))
}
