//! Repository layer for the source ledger.
//!
//! This module provides the `Repository` struct for ledger operations.
//! Methods are organized across submodules:
//! - `ledger.rs` - Aggregation reads backing `LedgerSource`
//!
//! The write methods here mirror what the upstream event ingester does and are used to seed
//! fixtures and local databases.

mod ledger;

use crate::domain::{EntityId, EntityKind, RawAmount};
use sqlx::sqlite::SqlitePool;

/// Repository for ledger database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Entity operations
    // =========================================================================

    /// Insert or replace a brand and its current-season balance.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_brand(
        &self,
        id: EntityId,
        name: &str,
        points: &RawAmount,
    ) -> Result<(), sqlx::Error> {
        let query = sqlx::query(
            r#"
            INSERT INTO brands (id, name, points)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                points = excluded.points
            "#,
        )
        .bind(id.as_i64())
        .bind(name);

        bind_raw_amount(query, points).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace a user and its current-season balance.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_user(
        &self,
        id: EntityId,
        username: &str,
        points: &RawAmount,
        power_level: i64,
    ) -> Result<(), sqlx::Error> {
        let query = sqlx::query(
            r#"
            INSERT INTO users (id, username, points, power_level)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                points = excluded.points,
                power_level = excluded.power_level
            "#,
        )
        .bind(id.as_i64())
        .bind(username);

        bind_raw_amount(query, points)
            .bind(power_level)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Vote and period operations
    // =========================================================================

    /// Record a podium vote. `place` is 1 (gold), 2 (silver) or 3 (bronze).
    ///
    /// # Errors
    /// Returns an error if the insert fails, including a place outside 1..=3.
    pub async fn insert_vote(
        &self,
        user_id: EntityId,
        brand_id: EntityId,
        place: i64,
        period_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO podium_votes (user_id, brand_id, place, period_id, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id.as_i64())
        .bind(brand_id.as_i64())
        .bind(place)
        .bind(period_id)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace an entity's standing for one period.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_period_standing(
        &self,
        kind: EntityKind,
        id: EntityId,
        period_id: i64,
        points: &RawAmount,
        rank: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        let query = sqlx::query(
            r#"
            INSERT INTO period_standings (entity_kind, entity_id, period_id, points, rank)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_kind, entity_id, period_id) DO UPDATE SET
                points = excluded.points,
                rank = excluded.rank
            "#,
        )
        .bind(kind.as_str())
        .bind(id.as_i64())
        .bind(period_id);

        bind_raw_amount(query, points)
            .bind(rank)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind an amount with the storage class the ledger uses for it.
fn bind_raw_amount<'q>(query: SqliteQuery<'q>, amount: &RawAmount) -> SqliteQuery<'q> {
    match amount {
        RawAmount::Fixed(digits) => query.bind(digits.clone()),
        RawAmount::Decimal(value) => query.bind(value.to_string()),
        RawAmount::Numeric(value) => query.bind(*value),
    }
}

/// Ledger table holding entities of `kind`.
pub(crate) fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Brand => "brands",
        EntityKind::User => "users",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use sqlx::Row;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn id(n: i64) -> EntityId {
        EntityId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_brand_replaces_points() {
        let (repo, _temp) = setup_test_db().await;

        repo.upsert_brand(id(1), "Acme", &RawAmount::fixed("1"))
            .await
            .unwrap();
        repo.upsert_brand(id(1), "Acme", &RawAmount::fixed("2"))
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n, MAX(points) AS points FROM brands")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
        assert_eq!(row.get::<String, _>("points"), "2");
    }

    #[tokio::test]
    async fn test_insert_vote_rejects_invalid_place() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.insert_vote(id(1), id(2), 1, 1).await.is_ok());
        assert!(repo.insert_vote(id(1), id(2), 4, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_numeric_amount_stored_as_real() {
        let (repo, _temp) = setup_test_db().await;
        repo.upsert_user(id(9), "legacy", &RawAmount::Numeric(12.5), 3)
            .await
            .unwrap();

        let storage: (String,) = sqlx::query_as("SELECT typeof(points) FROM users WHERE id = 9")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(storage.0, "real");
    }
}
