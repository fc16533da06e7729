//! Paginated leaderboard reads over the snapshot (fast path) or the live ledger (slow path).

use super::refresh::{RefreshCoordinator, RefreshError};
use crate::datasource::MetadataEnricher;
use crate::db::{LiveQuery, StoreError};
use crate::domain::{
    Aggregates, DisplayMetadata, EntityAggregate, EntityId, EntityKind, PeriodStanding,
    SnapshotRow, SortField, SortOrder, TimeMs,
};
use crate::engine::{normalize, AmountError, BaselineError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid amount for entity {entity_id}: {source}")]
    Amount {
        entity_id: EntityId,
        source: AmountError,
    },
    #[error(transparent)]
    Baseline(#[from] BaselineError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRequest {
    pub page: i64,
    pub page_size: i64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub ids: Option<Vec<EntityId>>,
}

impl Default for LeaderboardRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: SortField::CANONICAL,
            sort_order: SortOrder::Desc,
            ids: None,
        }
    }
}

impl LeaderboardRequest {
    pub fn validate(&self, kind: EntityKind) -> Result<(), LeaderboardError> {
        if self.page < 1 {
            return Err(LeaderboardError::InvalidRequest(
                "page must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(LeaderboardError::InvalidRequest(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if !self.sort_by.applies_to(kind) {
            return Err(LeaderboardError::InvalidRequest(format!(
                "sortBy {} is not available for {}",
                self.sort_by.as_str(),
                kind
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Whether the snapshot can serve this request.
    pub fn is_fast_path(&self) -> bool {
        self.sort_by == SortField::CANONICAL && self.ids.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub id: EntityId,
    pub rank: Option<i64>,
    pub all_time_points: f64,
    pub baseline_points: f64,
    pub current_points: f64,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub period_rank: Option<i64>,
    pub period_points: Option<f64>,
    pub display_name: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub rows: Vec<LeaderboardRow>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Clone)]
pub struct LeaderboardService {
    refresh: RefreshCoordinator,
    enricher: Arc<dyn MetadataEnricher>,
}

impl LeaderboardService {
    pub fn new(refresh: RefreshCoordinator, enricher: Arc<dyn MetadataEnricher>) -> Self {
        Self { refresh, enricher }
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub async fn get_leaderboard(
        &self,
        kind: EntityKind,
        request: &LeaderboardRequest,
    ) -> Result<LeaderboardPage, LeaderboardError> {
        request.validate(kind)?;

        let (rows, total_count, positional) = if request.is_fast_path() {
            debug!(kind = %kind, page = request.page, "Serving leaderboard from snapshot");
            self.refresh.ensure_materialized(kind).await?;
            let page = self
                .refresh
                .store()
                .query(kind, request.sort_order, request.page_size, request.offset())
                .await?;
            (page.rows, page.total_count, true)
        } else {
            debug!(
                kind = %kind,
                sort_by = request.sort_by.as_str(),
                filtered = request.ids.is_some(),
                "Serving leaderboard from live ledger"
            );
            let (rows, total_count) = self.live_page(kind, request).await?;
            (rows, total_count, false)
        };

        let rows = self
            .enrich(kind, rows, positional.then(|| request.offset()))
            .await?;

        Ok(LeaderboardPage {
            rows,
            total_count,
            page: request.page,
            page_size: request.page_size,
        })
    }

    async fn live_page(
        &self,
        kind: EntityKind,
        request: &LeaderboardRequest,
    ) -> Result<(Vec<SnapshotRow>, i64), LeaderboardError> {
        let ledger = self.refresh.ledger();
        let now = TimeMs::now();

        if request.sort_by.is_sql_orderable() {
            let page = ledger
                .fetch_live_page(
                    kind,
                    &LiveQuery {
                        sort_by: request.sort_by,
                        sort_order: request.sort_order,
                        ids: request.ids.clone(),
                        limit: request.page_size,
                        offset: request.offset(),
                    },
                )
                .await?;
            let rows = self.merge_rows(&page.rows, now).await?;
            return Ok((rows, page.total_count));
        }

        let entities = ledger
            .fetch_entity_aggregates(kind, request.ids.as_deref())
            .await?;
        let mut rows = self.merge_rows(&entities, now).await?;
        rows.sort_by(|a, b| {
            let ordering = match request.sort_by {
                SortField::CurrentPoints => a.current_points.total_cmp(&b.current_points),
                _ => a.all_time_points.total_cmp(&b.all_time_points),
            };
            request
                .sort_order
                .apply(ordering)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_count = rows.len() as i64;
        let rows = rows
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.page_size as usize)
            .collect();
        Ok((rows, total_count))
    }

    async fn merge_rows(
        &self,
        entities: &[EntityAggregate],
        now: TimeMs,
    ) -> Result<Vec<SnapshotRow>, LeaderboardError> {
        let baseline = self.refresh.merger().baseline().await?;
        entities
            .iter()
            .map(|entity| {
                baseline
                    .merge(entity, now)
                    .map_err(|source| LeaderboardError::Amount {
                        entity_id: entity.id,
                        source,
                    })
            })
            .collect()
    }

    /// Attach period standings and display metadata for this page's ids only.
    ///
    /// A stored period rank wins when present. Otherwise, with `first_offset`, ranks
    /// are page positions in the full snapshot ordering. Lookup failures degrade to
    /// null period fields and placeholder display fields.
    async fn enrich(
        &self,
        kind: EntityKind,
        rows: Vec<SnapshotRow>,
        first_offset: Option<i64>,
    ) -> Result<Vec<LeaderboardRow>, LeaderboardError> {
        let ids: Vec<EntityId> = rows.iter().map(|r| r.id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let standings = match self.refresh.ledger().fetch_period_standings(kind, &ids).await {
            Ok(standings) => standings,
            Err(e) => {
                warn!(
                    kind = %kind,
                    error = %e,
                    "Period standings lookup failed, leaving period fields empty"
                );
                HashMap::new()
            }
        };
        let mut metadata = match self.enricher.lookup(kind, &ids).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Metadata lookup failed, using placeholders");
                HashMap::new()
            }
        };

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let standing = standings.get(&row.id);
                let display = metadata
                    .remove(&row.id)
                    .unwrap_or_else(|| DisplayMetadata::placeholder(kind, row.id));
                let period_rank = standing.and_then(|s| s.rank);
                let rank =
                    period_rank.or_else(|| first_offset.map(|offset| offset + i as i64 + 1));
                LeaderboardRow {
                    id: row.id,
                    rank,
                    all_time_points: row.all_time_points,
                    baseline_points: row.baseline_points,
                    current_points: row.current_points,
                    aggregates: row.aggregates,
                    period_rank,
                    period_points: standing.and_then(|s| period_points(row.id, s)),
                    display_name: display.display_name,
                    image_url: display.image_url,
                }
            })
            .collect())
    }
}

impl std::fmt::Debug for LeaderboardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderboardService")
            .field("refresh", &self.refresh)
            .field("enricher", &self.enricher)
            .finish()
    }
}

fn period_points(id: EntityId, standing: &PeriodStanding) -> Option<f64> {
    match normalize(&standing.points) {
        Ok(points) => Some(points),
        Err(e) => {
            warn!(id = %id, period = standing.period_id, error = %e, "Skipping period points");
            None
        }
    }
}
