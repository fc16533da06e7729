//! In-memory ledger for testing without a database.

use super::ledger::{LedgerSource, LivePage, LiveQuery};
use super::StoreError;
use crate::domain::{EntityAggregate, EntityId, EntityKind, PeriodStanding, SortField};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Mock ledger that serves predefined aggregates and counts full-set fetches.
#[derive(Debug, Default)]
pub struct MockLedger {
    entities: RwLock<Vec<EntityAggregate>>,
    standings: RwLock<HashMap<(EntityKind, EntityId), PeriodStanding>>,
    aggregate_fetches: AtomicUsize,
    fail: AtomicBool,
    fail_standings: AtomicBool,
    latency: Option<Duration>,
}

impl MockLedger {
    /// Create a new mock ledger with no entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity aggregate; its kind follows its aggregates.
    pub fn with_entity(mut self, entity: EntityAggregate) -> Self {
        self.entities.get_mut().push(entity);
        self
    }

    /// Add multiple entity aggregates.
    pub fn with_entities(mut self, entities: Vec<EntityAggregate>) -> Self {
        self.entities.get_mut().extend(entities);
        self
    }

    /// Add a current-period standing.
    pub fn with_standing(mut self, kind: EntityKind, id: EntityId, standing: PeriodStanding) -> Self {
        self.standings.get_mut().insert((kind, id), standing);
        self
    }

    /// Delay every aggregate fetch, keeping a refresh in flight long enough to be joined.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Swap the full entity set.
    pub async fn replace_entities(&self, entities: Vec<EntityAggregate>) {
        *self.entities.write().await = entities;
    }

    /// Make every subsequent read fail with a store error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make only period-standing reads fail; aggregate and live reads keep working.
    pub fn set_failing_standings(&self, fail: bool) {
        self.fail_standings.store(fail, Ordering::SeqCst);
    }

    /// Number of `fetch_entity_aggregates` calls so far.
    pub fn aggregate_fetches(&self) -> usize {
        self.aggregate_fetches.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Db(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn select(&self, kind: EntityKind, ids: Option<&[EntityId]>) -> Vec<EntityAggregate> {
        self.entities
            .read()
            .await
            .iter()
            .filter(|e| e.aggregates.kind() == kind)
            .filter(|e| ids.map_or(true, |ids| ids.contains(&e.id)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerSource for MockLedger {
    async fn fetch_entity_aggregates(
        &self,
        kind: EntityKind,
        ids: Option<&[EntityId]>,
    ) -> Result<Vec<EntityAggregate>, StoreError> {
        self.aggregate_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.check_failing()?;
        Ok(self.select(kind, ids).await)
    }

    async fn fetch_live_page(
        &self,
        kind: EntityKind,
        query: &LiveQuery,
    ) -> Result<LivePage, StoreError> {
        self.check_failing()?;
        let mut rows = self.select(kind, query.ids.as_deref()).await;
        rows.sort_by(|a, b| {
            let ordering = match query.sort_by {
                SortField::Id => a.id.cmp(&b.id),
                field => a
                    .aggregates
                    .sort_value(field)
                    .cmp(&b.aggregates.sort_value(field)),
            };
            query.sort_order.apply(ordering).then_with(|| a.id.cmp(&b.id))
        });

        let total_count = rows.len() as i64;
        let rows = rows
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok(LivePage { rows, total_count })
    }

    async fn fetch_period_standings(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, PeriodStanding>, StoreError> {
        self.check_failing()?;
        if self.fail_standings.load(Ordering::SeqCst) {
            return Err(StoreError::Db(sqlx::Error::PoolTimedOut));
        }
        let standings = self.standings.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| standings.get(&(kind, *id)).map(|s| (*id, s.clone())))
            .collect())
    }
}
