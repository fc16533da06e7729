//! Read seam over the live source ledger.
//!
//! The refresh path and the live query path only see this trait, so tests can count
//! recomputations or inject failures without a database.

use super::StoreError;
use crate::domain::{EntityAggregate, EntityId, EntityKind, PeriodStanding, SortField, SortOrder};
use async_trait::async_trait;
use std::collections::HashMap;

/// Ordering, filter and window for a live aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveQuery {
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub ids: Option<Vec<EntityId>>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of live aggregates plus the size of the full (filtered) set.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePage {
    pub rows: Vec<EntityAggregate>,
    pub total_count: i64,
}

#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Aggregate every entity of `kind`, or only `ids` when given.
    ///
    /// Row order is unspecified.
    async fn fetch_entity_aggregates(
        &self,
        kind: EntityKind,
        ids: Option<&[EntityId]>,
    ) -> Result<Vec<EntityAggregate>, StoreError>;

    /// Ordered, paginated aggregation for fields that do not depend on point totals.
    async fn fetch_live_page(
        &self,
        kind: EntityKind,
        query: &LiveQuery,
    ) -> Result<LivePage, StoreError>;

    /// Current-period standings for the given ids. Ids without a standing are absent.
    async fn fetch_period_standings(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, PeriodStanding>, StoreError>;
}
