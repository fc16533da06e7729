//! Single-flight materialization of the per-kind leaderboard snapshots.
//!
//! Each entity kind owns a [`CacheCoordinator`] holding two pieces of process-local state: a
//! schema-ready cell and the handle of the refresh currently in flight. Callers that find the
//! snapshot stale either start a refresh or await the one already running; they never run a
//! second recomputation alongside it.
//!
//! A refresh runs as a spawned task bounded by the refresh timeout, so a caller that goes away
//! does not cancel work other callers are waiting on. The task clears its in-flight marker when
//! it finishes, whatever the outcome, and a failure never advances the snapshot's expiry.

use crate::db::{LedgerSource, SnapshotMeta, SnapshotStore, StoreError};
use crate::domain::{EntityAggregate, EntityId, EntityKind, SnapshotRow, TimeMs};
use crate::engine::{AmountError, BaselineError, BaselineMap, BaselineMerger};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

/// Failure of a snapshot rebuild.
///
/// Cloneable so one outcome can be handed to every caller joined on the same refresh.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("ledger read failed: {0}")]
    Ledger(Arc<StoreError>),
    #[error("snapshot store failed: {0}")]
    Snapshot(Arc<StoreError>),
    #[error("invalid amount for entity {entity_id}: {source}")]
    Amount {
        entity_id: EntityId,
        source: AmountError,
    },
    #[error(transparent)]
    Baseline(#[from] BaselineError),
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

impl RefreshError {
    fn ledger(err: StoreError) -> Self {
        RefreshError::Ledger(Arc::new(err))
    }

    fn snapshot(err: StoreError) -> Self {
        RefreshError::Snapshot(Arc::new(err))
    }
}

/// Result of one completed rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub kind: EntityKind,
    pub row_count: usize,
    pub refreshed_at: TimeMs,
}

/// How `ensure_materialized` satisfied its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The snapshot was already fresh.
    Fresh,
    /// This caller started the rebuild.
    Refreshed(RefreshOutcome),
    /// This caller awaited a rebuild another caller started.
    Joined(RefreshOutcome),
}

type SharedRefresh = Shared<BoxFuture<'static, Result<RefreshOutcome, RefreshError>>>;

struct InFlight {
    generation: u64,
    refresh: SharedRefresh,
}

/// Per-kind schema flag and in-flight refresh handle.
pub struct CacheCoordinator {
    kind: EntityKind,
    schema_ready: OnceCell<()>,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

impl CacheCoordinator {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            schema_ready: OnceCell::new(),
            in_flight: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.initialized()
    }

    /// Whether a refresh is currently recorded as in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Clear the marker only if it still belongs to `generation`.
    async fn clear(&self, generation: u64) {
        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().map(|f| f.generation) == Some(generation) {
            *slot = None;
        }
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("kind", &self.kind)
            .field("schema_ready", &self.schema_ready())
            .finish_non_exhaustive()
    }
}

/// Keeps each kind's snapshot fresh with at most one rebuild in flight per kind.
#[derive(Clone)]
pub struct RefreshCoordinator {
    store: Arc<SnapshotStore>,
    ledger: Arc<dyn LedgerSource>,
    merger: Arc<BaselineMerger>,
    brands: Arc<CacheCoordinator>,
    users: Arc<CacheCoordinator>,
    ttl: Duration,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<SnapshotStore>,
        ledger: Arc<dyn LedgerSource>,
        merger: Arc<BaselineMerger>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            merger,
            brands: Arc::new(CacheCoordinator::new(EntityKind::Brand)),
            users: Arc::new(CacheCoordinator::new(EntityKind::User)),
            ttl,
            timeout,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn ledger(&self) -> &dyn LedgerSource {
        self.ledger.as_ref()
    }

    pub fn merger(&self) -> &BaselineMerger {
        &self.merger
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn coordinator(&self, kind: EntityKind) -> &Arc<CacheCoordinator> {
        match kind {
            EntityKind::Brand => &self.brands,
            EntityKind::User => &self.users,
        }
    }

    /// Create the snapshot tables for `kind` once per process.
    pub async fn ensure_schema(&self, kind: EntityKind) -> Result<(), StoreError> {
        self.coordinator(kind)
            .schema_ready
            .get_or_try_init(|| self.store.ensure_schema(kind))
            .await?;
        Ok(())
    }

    /// Snapshot metadata for `kind`, or `None` if it was never materialized.
    pub async fn status(&self, kind: EntityKind) -> Result<Option<SnapshotMeta>, StoreError> {
        self.ensure_schema(kind).await?;
        self.store.meta(kind).await
    }

    pub async fn ensure_materialized(&self, kind: EntityKind) -> Result<RefreshStatus, RefreshError> {
        self.ensure_materialized_at(kind, TimeMs::now()).await
    }

    /// Make the snapshot for `kind` fresh as of `now`, rebuilding it or joining a rebuild.
    pub async fn ensure_materialized_at(
        &self,
        kind: EntityKind,
        now: TimeMs,
    ) -> Result<RefreshStatus, RefreshError> {
        self.ensure_schema(kind)
            .await
            .map_err(RefreshError::snapshot)?;

        if self.is_fresh(kind, now).await? {
            return Ok(RefreshStatus::Fresh);
        }

        let cache = self.coordinator(kind).clone();
        let (refresh, joined) = {
            let mut slot = cache.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(kind = %kind, "Joining in-flight refresh");
                    (in_flight.refresh.clone(), true)
                }
                None => {
                    // A rebuild may have finished between the first check and taking the lock.
                    if self.is_fresh(kind, now).await? {
                        return Ok(RefreshStatus::Fresh);
                    }
                    let generation = cache.generations.fetch_add(1, Ordering::SeqCst);
                    let refresh = self.spawn_refresh(kind, now, generation);
                    *slot = Some(InFlight {
                        generation,
                        refresh: refresh.clone(),
                    });
                    (refresh, false)
                }
            }
        };

        let outcome = refresh.await?;
        Ok(if joined {
            RefreshStatus::Joined(outcome)
        } else {
            RefreshStatus::Refreshed(outcome)
        })
    }

    async fn is_fresh(&self, kind: EntityKind, now: TimeMs) -> Result<bool, RefreshError> {
        self.store
            .is_fresh(kind, now)
            .await
            .map_err(RefreshError::snapshot)
    }

    /// Start the rebuild task. Must be called with the in-flight slot locked, so the task's
    /// own clear cannot run before its marker is recorded.
    fn spawn_refresh(&self, kind: EntityKind, now: TimeMs, generation: u64) -> SharedRefresh {
        let this = self.clone();
        let cache = self.coordinator(kind).clone();
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(this.timeout, this.rebuild(kind, now)).await {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Timeout(this.timeout)),
            };
            if let Err(e) = &result {
                error!(kind = %kind, error = %e, "Snapshot refresh failed");
            }
            this.coordinator(kind).clear(generation).await;
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    cache.clear(generation).await;
                    Err(RefreshError::Aborted(join_err.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn rebuild(&self, kind: EntityKind, now: TimeMs) -> Result<RefreshOutcome, RefreshError> {
        let started = Instant::now();
        info!(kind = %kind, "Refreshing leaderboard snapshot");

        let entities = self
            .ledger
            .fetch_entity_aggregates(kind, None)
            .await
            .map_err(RefreshError::ledger)?;
        let baseline = self.merger.baseline().await?;
        let rows = build_rows(baseline, &entities, now)?;

        self.store
            .replace_all(kind, &rows, now, self.ttl)
            .await
            .map_err(RefreshError::snapshot)?;

        info!(
            kind = %kind,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Leaderboard snapshot refreshed"
        );
        Ok(RefreshOutcome {
            kind,
            row_count: rows.len(),
            refreshed_at: now,
        })
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("brands", &self.brands)
            .field("users", &self.users)
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Normalize and merge every entity; one bad amount fails the whole set.
fn build_rows(
    baseline: &BaselineMap,
    entities: &[EntityAggregate],
    now: TimeMs,
) -> Result<Vec<SnapshotRow>, RefreshError> {
    entities
        .iter()
        .map(|entity| {
            baseline
                .merge(entity, now)
                .map_err(|source| RefreshError::Amount {
                    entity_id: entity.id,
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::db::MockLedger;
    use crate::domain::{Aggregates, RawAmount, SortOrder};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_millis(60_000);

    fn id(n: i64) -> EntityId {
        EntityId::new(n).unwrap()
    }

    fn brand(n: i64, points: &str) -> EntityAggregate {
        EntityAggregate {
            id: id(n),
            current_points: RawAmount::fixed(points),
            aggregates: Aggregates::Brand {
                gold_count: n,
                silver_count: 0,
                bronze_count: 0,
            },
        }
    }

    async fn setup(
        ledger: Arc<MockLedger>,
        timeout: Duration,
    ) -> (RefreshCoordinator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let coordinator = RefreshCoordinator::new(
            Arc::new(SnapshotStore::new(pool)),
            ledger,
            Arc::new(BaselineMerger::in_memory(HashMap::from([(id(1), 10.0)]))),
            TTL,
            timeout,
        );
        (coordinator, temp_dir)
    }

    #[tokio::test]
    async fn test_refresh_materializes_rows() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_entity(brand(1, "2500000000000000000"))
                .with_entity(brand(2, "1000000000000000000")),
        );
        let (coordinator, _temp) = setup(ledger, Duration::from_secs(5)).await;

        let status = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
            .await
            .unwrap();
        assert!(matches!(status, RefreshStatus::Refreshed(o) if o.row_count == 2));

        let page = coordinator
            .store()
            .query(EntityKind::Brand, SortOrder::Desc, 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.rows[0].id, id(1));
        assert_eq!(page.rows[0].all_time_points, 12.5);
        assert_eq!(page.rows[1].all_time_points, 1.0);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_skips_refresh() {
        let ledger = Arc::new(MockLedger::new().with_entity(brand(1, "0")));
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_secs(5)).await;

        coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
            .await
            .unwrap();
        let status = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(60_999))
            .await
            .unwrap();
        assert_eq!(status, RefreshStatus::Fresh);
        assert_eq!(ledger.aggregate_fetches(), 1);

        // expiresAt = 61_000 is not fresh at 61_000
        let status = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(61_000))
            .await
            .unwrap();
        assert!(matches!(status, RefreshStatus::Refreshed(_)));
        assert_eq!(ledger.aggregate_fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_entity(brand(1, "1"))
                .with_latency(Duration::from_millis(100)),
        );
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_secs(5)).await;

        let calls = (0..10).map(|_| {
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(ledger.aggregate_fetches(), 1);
        let refreshed = results
            .iter()
            .filter(|r| matches!(r, Ok(RefreshStatus::Refreshed(_))))
            .count();
        assert_eq!(refreshed, 1);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(!coordinator.coordinator(EntityKind::Brand).is_refreshing().await);
    }

    #[tokio::test]
    async fn test_kinds_refresh_independently() {
        let ledger = Arc::new(MockLedger::new().with_entity(brand(1, "1")));
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_secs(5)).await;

        coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
            .await
            .unwrap();
        let status = coordinator
            .ensure_materialized_at(EntityKind::User, TimeMs::new(1_000))
            .await
            .unwrap();
        assert!(matches!(status, RefreshStatus::Refreshed(o) if o.row_count == 0));
        assert_eq!(ledger.aggregate_fetches(), 2);
    }

    #[tokio::test]
    async fn test_malformed_amount_fails_refresh_and_keeps_old_snapshot() {
        let ledger = Arc::new(MockLedger::new().with_entity(brand(1, "1000000000000000000")));
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_secs(5)).await;

        coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
            .await
            .unwrap();

        ledger
            .replace_entities(vec![brand(1, "2000000000000000000"), brand(2, "12.5e3")])
            .await;
        let err = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(100_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Amount { entity_id, source: AmountError::Malformed(_) } if entity_id == id(2)
        ));

        let meta = coordinator.status(EntityKind::Brand).await.unwrap().unwrap();
        assert_eq!(meta.expires_at, TimeMs::new(61_000));
        assert!(!meta.is_fresh_at(TimeMs::new(100_000)));
        let page = coordinator
            .store()
            .query(EntityKind::Brand, SortOrder::Desc, 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.rows[0].all_time_points, 11.0);

        // Marker cleared, so the next call retries
        ledger
            .replace_entities(vec![brand(1, "2000000000000000000")])
            .await;
        let status = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(100_001))
            .await
            .unwrap();
        assert!(matches!(status, RefreshStatus::Refreshed(_)));
        assert_eq!(ledger.aggregate_fetches(), 3);
    }

    #[tokio::test]
    async fn test_ledger_failure_rejects_all_joined_callers() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_entity(brand(1, "1"))
                .with_latency(Duration::from_millis(50)),
        );
        ledger.set_failing(true);
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_secs(5)).await;

        let calls = (0..5).map(|_| {
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(ledger.aggregate_fetches(), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(RefreshError::Ledger(_)))));
        assert!(!coordinator.coordinator(EntityKind::Brand).is_refreshing().await);
    }

    #[tokio::test]
    async fn test_refresh_timeout_clears_marker() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_entity(brand(1, "1"))
                .with_latency(Duration::from_millis(500)),
        );
        let (coordinator, _temp) = setup(ledger.clone(), Duration::from_millis(50)).await;

        let err = coordinator
            .ensure_materialized_at(EntityKind::Brand, TimeMs::new(1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Timeout(_)));
        assert!(!coordinator.coordinator(EntityKind::Brand).is_refreshing().await);
        assert!(coordinator.status(EntityKind::Brand).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_schema_is_memoized() {
        let ledger = Arc::new(MockLedger::new());
        let (coordinator, _temp) = setup(ledger, Duration::from_secs(5)).await;

        assert!(!coordinator.coordinator(EntityKind::User).schema_ready());
        tokio_test::assert_ok!(coordinator.ensure_schema(EntityKind::User).await);
        tokio_test::assert_ok!(coordinator.ensure_schema(EntityKind::User).await);
        assert!(coordinator.coordinator(EntityKind::User).schema_ready());
        assert!(!coordinator.coordinator(EntityKind::Brand).schema_ready());
    }
}
