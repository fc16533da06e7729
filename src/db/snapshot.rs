//! Materialized leaderboard snapshots.
//!
//! Each entity kind has a row table holding one precomputed row per entity, plus a row in the
//! shared meta table recording when that set expires. The meta row is written only after every
//! row of a rebuild has landed, so `expires_at_ms > now` implies the row set is a complete
//! rebuild. A rebuild that dies midway leaves the previous, already-expired meta in place.

use super::StoreError;
use crate::domain::{
    Aggregates, EntityId, EntityKind, SnapshotRow, SortOrder, TimeMs, ValidationError,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::time::Duration;
use tracing::{debug, info};

/// Default number of rows per multi-row upsert.
pub const DEFAULT_BATCH_SIZE: usize = 200;

const META_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS leaderboard_cache_meta (
        cache_name TEXT PRIMARY KEY,
        expires_at_ms INTEGER NOT NULL,
        refreshed_at_ms INTEGER NOT NULL,
        row_count INTEGER NOT NULL
    )
"#;

const BRAND_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS brand_leaderboard_cache (
        id INTEGER PRIMARY KEY,
        all_time_points REAL NOT NULL,
        baseline_points REAL NOT NULL,
        current_points REAL NOT NULL,
        gold_count INTEGER NOT NULL,
        silver_count INTEGER NOT NULL,
        bronze_count INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
"#;

const USER_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS user_leaderboard_cache (
        id INTEGER PRIMARY KEY,
        all_time_points REAL NOT NULL,
        baseline_points REAL NOT NULL,
        current_points REAL NOT NULL,
        vote_count INTEGER NOT NULL,
        power_level INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
"#;

/// Freshness record for one kind's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub kind: EntityKind,
    pub expires_at: TimeMs,
    pub refreshed_at: TimeMs,
    pub row_count: i64,
}

impl SnapshotMeta {
    pub fn is_fresh_at(&self, now: TimeMs) -> bool {
        self.expires_at > now
    }
}

/// A page of snapshot rows in canonical order plus the size of the whole set.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPage {
    pub rows: Vec<SnapshotRow>,
    pub total_count: i64,
}

/// Row table name for a kind.
fn cache_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Brand => "brand_leaderboard_cache",
        EntityKind::User => "user_leaderboard_cache",
    }
}

fn aggregate_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Brand => &["gold_count", "silver_count", "bronze_count"],
        EntityKind::User => &["vote_count", "power_level"],
    }
}

/// SQLite-backed store of materialized leaderboard rows.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
    batch_size: usize,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_batch_size(pool, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(pool: SqlitePool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Create the row table, its sort index and the meta table for `kind`.
    ///
    /// Safe to call repeatedly.
    pub async fn ensure_schema(&self, kind: EntityKind) -> Result<(), StoreError> {
        let table = cache_table(kind);
        let table_ddl = match kind {
            EntityKind::Brand => BRAND_TABLE_DDL,
            EntityKind::User => USER_TABLE_DDL,
        };
        let index_ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_points ON {table} (all_time_points DESC, id ASC)"
        );

        sqlx::query(table_ddl).execute(&self.pool).await?;
        sqlx::query(&index_ddl).execute(&self.pool).await?;
        sqlx::query(META_TABLE_DDL).execute(&self.pool).await?;

        info!(kind = %kind, table, "Snapshot schema ready");
        Ok(())
    }

    /// Read the meta row for `kind`, if it was ever materialized.
    pub async fn meta(&self, kind: EntityKind) -> Result<Option<SnapshotMeta>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT expires_at_ms, refreshed_at_ms, row_count
            FROM leaderboard_cache_meta
            WHERE cache_name = ?
            "#,
        )
        .bind(kind.cache_name())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_meta(kind, &r)).transpose()
    }

    /// True iff a meta row exists for `kind` with `expires_at > now`.
    pub async fn is_fresh(&self, kind: EntityKind, now: TimeMs) -> Result<bool, StoreError> {
        Ok(self
            .meta(kind)
            .await?
            .map(|meta| meta.is_fresh_at(now))
            .unwrap_or(false))
    }

    /// Replace the whole row set for `kind`, then advance its expiry to `now + ttl`.
    ///
    /// Rows are deleted, reinserted in sequential batches, and the meta row is written last.
    /// This is not transactional: a failure partway leaves meta stale and the next successful
    /// call supersedes whatever was written.
    ///
    /// # Errors
    /// Returns an error if a row belongs to another kind or any statement fails.
    pub async fn replace_all(
        &self,
        kind: EntityKind,
        rows: &[SnapshotRow],
        now: TimeMs,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if let Some(row) = rows.iter().find(|r| r.aggregates.kind() != kind) {
            return Err(ValidationError::new(
                "aggregates",
                format!("row {} is a {} row, expected {}", row.id, row.aggregates.kind(), kind),
            )
            .into());
        }

        let table = cache_table(kind);
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&self.pool)
            .await?;

        for (batch_no, batch) in rows.chunks(self.batch_size).enumerate() {
            let mut builder = upsert_builder(kind);
            builder.push_values(batch, |mut values, row| {
                values
                    .push_bind(row.id.as_i64())
                    .push_bind(row.all_time_points)
                    .push_bind(row.baseline_points)
                    .push_bind(row.current_points);
                match row.aggregates {
                    Aggregates::Brand {
                        gold_count,
                        silver_count,
                        bronze_count,
                    } => {
                        values
                            .push_bind(gold_count)
                            .push_bind(silver_count)
                            .push_bind(bronze_count);
                    }
                    Aggregates::User {
                        vote_count,
                        power_level,
                    } => {
                        values.push_bind(vote_count).push_bind(power_level);
                    }
                }
                values.push_bind(row.updated_at_ms.as_i64());
            });
            push_upsert_conflict(&mut builder, kind);

            builder.build().execute(&self.pool).await?;
            debug!(kind = %kind, batch = batch_no, rows = batch.len(), "Wrote snapshot batch");
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        sqlx::query(
            r#"
            INSERT INTO leaderboard_cache_meta (cache_name, expires_at_ms, refreshed_at_ms, row_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_name) DO UPDATE SET
                expires_at_ms = excluded.expires_at_ms,
                refreshed_at_ms = excluded.refreshed_at_ms,
                row_count = excluded.row_count
            "#,
        )
        .bind(kind.cache_name())
        .bind(now.plus_ms(ttl_ms).as_i64())
        .bind(now.as_i64())
        .bind(rows.len() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ordered page read plus total count. Callers confirm freshness first.
    ///
    /// Rows are ordered by all-time points in `order`, ties by id ascending.
    pub async fn query(
        &self,
        kind: EntityKind,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<SnapshotPage, StoreError> {
        let table = cache_table(kind);

        // One read transaction, so the count and the page see the same snapshot.
        let mut tx = self.pool.begin().await?;

        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT id, all_time_points, baseline_points, current_points, {}, updated_at_ms \
             FROM {table} ORDER BY all_time_points {}, id ASC LIMIT ? OFFSET ?",
            aggregate_columns(kind).join(", "),
            order.as_sql(),
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let rows = rows
            .iter()
            .map(|row| decode_snapshot_row(kind, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SnapshotPage {
            rows,
            total_count: total.0,
        })
    }
}

fn upsert_builder(kind: EntityKind) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(cache_table(kind));
    builder.push(" (id, all_time_points, baseline_points, current_points, ");
    builder.push(aggregate_columns(kind).join(", "));
    builder.push(", updated_at_ms) ");
    builder
}

fn push_upsert_conflict(builder: &mut QueryBuilder<'static, Sqlite>, kind: EntityKind) {
    builder.push(
        " ON CONFLICT(id) DO UPDATE SET \
         all_time_points = excluded.all_time_points, \
         baseline_points = excluded.baseline_points, \
         current_points = excluded.current_points, \
         updated_at_ms = excluded.updated_at_ms",
    );
    for column in aggregate_columns(kind) {
        builder.push(format!(", {column} = excluded.{column}"));
    }
}

fn decode_meta(kind: EntityKind, row: &SqliteRow) -> Result<SnapshotMeta, StoreError> {
    let row_count: i64 = row.try_get("row_count")?;
    if row_count < 0 {
        return Err(ValidationError::new("row_count", format!("negative count {}", row_count)).into());
    }
    Ok(SnapshotMeta {
        kind,
        expires_at: TimeMs::new(row.try_get("expires_at_ms")?),
        refreshed_at: TimeMs::new(row.try_get("refreshed_at_ms")?),
        row_count,
    })
}

fn decode_points(row: &SqliteRow, column: &'static str) -> Result<f64, StoreError> {
    let value: f64 = row.try_get(column)?;
    if !value.is_finite() {
        return Err(ValidationError::new(column, "non-finite value").into());
    }
    Ok(value)
}

fn decode_count(row: &SqliteRow, column: &'static str) -> Result<i64, StoreError> {
    let value: i64 = row.try_get(column)?;
    if value < 0 {
        return Err(ValidationError::new(column, format!("negative count {}", value)).into());
    }
    Ok(value)
}

/// Decode one cached row, checking it has the shape a rebuild would have written.
pub fn decode_snapshot_row(kind: EntityKind, row: &SqliteRow) -> Result<SnapshotRow, StoreError> {
    let id = EntityId::new(row.try_get("id")?)
        .map_err(|e| ValidationError::new("id", e.to_string()))?;

    let aggregates = match kind {
        EntityKind::Brand => Aggregates::Brand {
            gold_count: decode_count(row, "gold_count")?,
            silver_count: decode_count(row, "silver_count")?,
            bronze_count: decode_count(row, "bronze_count")?,
        },
        EntityKind::User => Aggregates::User {
            vote_count: decode_count(row, "vote_count")?,
            power_level: row.try_get("power_level")?,
        },
    };

    Ok(SnapshotRow {
        id,
        all_time_points: decode_points(row, "all_time_points")?,
        baseline_points: decode_points(row, "baseline_points")?,
        current_points: decode_points(row, "current_points")?,
        aggregates,
        updated_at_ms: TimeMs::new(row.try_get("updated_at_ms")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_millis(60_000);

    async fn setup_store(batch_size: usize) -> (SnapshotStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let store = SnapshotStore::with_batch_size(pool, batch_size);
        store.ensure_schema(EntityKind::Brand).await.unwrap();
        store.ensure_schema(EntityKind::User).await.unwrap();
        (store, temp_dir)
    }

    fn brand_row(id: i64, points: f64) -> SnapshotRow {
        SnapshotRow {
            id: EntityId::new(id).unwrap(),
            all_time_points: points,
            baseline_points: 0.0,
            current_points: points,
            aggregates: Aggregates::Brand {
                gold_count: id,
                silver_count: 0,
                bronze_count: 1,
            },
            updated_at_ms: TimeMs::new(1),
        }
    }

    fn user_row(id: i64, points: f64) -> SnapshotRow {
        SnapshotRow {
            aggregates: Aggregates::User {
                vote_count: 3,
                power_level: 2,
            },
            ..brand_row(id, points)
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (store, _temp) = setup_store(200).await;
        store.ensure_schema(EntityKind::Brand).await.unwrap();
        store.ensure_schema(EntityKind::Brand).await.unwrap();
        assert!(store.meta(EntityKind::Brand).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_all_then_query_returns_inserted_rows() {
        let (store, _temp) = setup_store(3).await;
        let rows: Vec<SnapshotRow> = (1..=10).map(|i| brand_row(i, i as f64 * 1.5)).collect();

        store
            .replace_all(EntityKind::Brand, &rows, TimeMs::new(0), TTL)
            .await
            .unwrap();

        let page = store
            .query(EntityKind::Brand, SortOrder::Desc, 100, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 10);
        assert_eq!(page.rows.len(), 10);
        assert_eq!(page.rows[0], rows[9]);
        assert_eq!(page.rows[9], rows[0]);

        let meta = store.meta(EntityKind::Brand).await.unwrap().unwrap();
        assert_eq!(meta.row_count, 10);
        assert_eq!(meta.refreshed_at, TimeMs::new(0));
    }

    #[tokio::test]
    async fn test_second_replace_all_supersedes_first() {
        let (store, _temp) = setup_store(200).await;
        let first: Vec<SnapshotRow> = (1..=5).map(|i| brand_row(i, i as f64)).collect();
        let second = vec![brand_row(4, 40.0), brand_row(9, 90.0)];

        store
            .replace_all(EntityKind::Brand, &first, TimeMs::new(0), TTL)
            .await
            .unwrap();
        store
            .replace_all(EntityKind::Brand, &second, TimeMs::new(10), TTL)
            .await
            .unwrap();

        let page = store
            .query(EntityKind::Brand, SortOrder::Desc, 100, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.rows, vec![second[1].clone(), second[0].clone()]);
    }

    #[tokio::test]
    async fn test_freshness_window_boundaries() {
        let (store, _temp) = setup_store(200).await;
        let t = TimeMs::new(1_700_000_000_000);

        assert!(!store.is_fresh(EntityKind::User, t).await.unwrap());

        store
            .replace_all(EntityKind::User, &[user_row(1, 5.0)], t, TTL)
            .await
            .unwrap();

        assert!(store.is_fresh(EntityKind::User, t.plus_ms(59_999)).await.unwrap());
        assert!(!store.is_fresh(EntityKind::User, t.plus_ms(60_000)).await.unwrap());
        assert!(!store.is_fresh(EntityKind::User, t.plus_ms(60_001)).await.unwrap());
        assert!(!store.is_fresh(EntityKind::Brand, t).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_ties_break_by_id() {
        let (store, _temp) = setup_store(200).await;
        let rows = vec![brand_row(3, 7.0), brand_row(1, 7.0), brand_row(2, 9.0)];
        store
            .replace_all(EntityKind::Brand, &rows, TimeMs::new(0), TTL)
            .await
            .unwrap();

        let desc = store
            .query(EntityKind::Brand, SortOrder::Desc, 10, 0)
            .await
            .unwrap();
        let ids: Vec<i64> = desc.rows.iter().map(|r| r.id.as_i64()).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let asc = store
            .query(EntityKind::Brand, SortOrder::Asc, 10, 0)
            .await
            .unwrap();
        let ids: Vec<i64> = asc.rows.iter().map(|r| r.id.as_i64()).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_query_pages_with_offset() {
        let (store, _temp) = setup_store(200).await;
        let rows: Vec<SnapshotRow> = (1..=25).map(|i| brand_row(i, i as f64)).collect();
        store
            .replace_all(EntityKind::Brand, &rows, TimeMs::new(0), TTL)
            .await
            .unwrap();

        let page = store
            .query(EntityKind::Brand, SortOrder::Desc, 10, 10)
            .await
            .unwrap();
        assert_eq!(page.total_count, 25);
        let ids: Vec<i64> = page.rows.iter().map(|r| r.id.as_i64()).collect();
        assert_eq!(ids, (6..=15).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_query_count_matches_rows_during_concurrent_replace() {
        let (store, _temp) = setup_store(1).await;
        let store = std::sync::Arc::new(store);
        let small: Vec<SnapshotRow> = (1..=3).map(|i| brand_row(i, i as f64)).collect();
        let large: Vec<SnapshotRow> = (1..=8).map(|i| brand_row(i, i as f64)).collect();
        store
            .replace_all(EntityKind::Brand, &large, TimeMs::new(0), TTL)
            .await
            .unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 0..20 {
                    let rows = if round % 2 == 0 { &small } else { &large };
                    store
                        .replace_all(EntityKind::Brand, rows, TimeMs::new(round), TTL)
                        .await
                        .unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let page = store
                .query(EntityKind::Brand, SortOrder::Desc, 100, 0)
                .await
                .unwrap();
            assert_eq!(page.total_count, page.rows.len() as i64);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_all_with_empty_set_clears_rows() {
        let (store, _temp) = setup_store(200).await;
        store
            .replace_all(EntityKind::Brand, &[brand_row(1, 1.0)], TimeMs::new(0), TTL)
            .await
            .unwrap();
        store
            .replace_all(EntityKind::Brand, &[], TimeMs::new(5), TTL)
            .await
            .unwrap();

        let page = store
            .query(EntityKind::Brand, SortOrder::Desc, 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
        assert!(store.is_fresh(EntityKind::Brand, TimeMs::new(6)).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_all_rejects_wrong_kind() {
        let (store, _temp) = setup_store(200).await;
        let result = store
            .replace_all(EntityKind::Brand, &[user_row(1, 1.0)], TimeMs::new(0), TTL)
            .await;
        assert!(matches!(result, Err(StoreError::Decode(_))));
        assert!(store.meta(EntityKind::Brand).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_rejects_corrupt_row() {
        let (store, _temp) = setup_store(200).await;
        sqlx::query(
            "INSERT INTO brand_leaderboard_cache VALUES (1, 5.0, 0.0, 5.0, -1, 0, 0, 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let result = store.query(EntityKind::Brand, SortOrder::Desc, 10, 0).await;
        match result {
            Err(StoreError::Decode(e)) => assert_eq!(e.field, "gold_count"),
            other => panic!("Expected decode error, got {:?}", other),
        }
    }
}
