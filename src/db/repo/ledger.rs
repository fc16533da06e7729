//! Live aggregation reads over the source ledger.

use super::{entity_table, Repository};
use crate::db::ledger::{LedgerSource, LivePage, LiveQuery};
use crate::db::StoreError;
use crate::domain::{
    Aggregates, EntityAggregate, EntityId, EntityKind, PeriodStanding, RawAmount, SortField,
    ValidationError,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;

const BRAND_AGGREGATE_SELECT: &str = r#"
    SELECT b.id AS id,
           typeof(b.points) AS points_type,
           CASE WHEN typeof(b.points) = 'text' THEN b.points END AS points_text,
           CASE WHEN typeof(b.points) IN ('integer', 'real') THEN CAST(b.points AS REAL) END AS points_num,
           COALESCE(SUM(CASE WHEN v.place = 1 THEN 1 ELSE 0 END), 0) AS gold_count,
           COALESCE(SUM(CASE WHEN v.place = 2 THEN 1 ELSE 0 END), 0) AS silver_count,
           COALESCE(SUM(CASE WHEN v.place = 3 THEN 1 ELSE 0 END), 0) AS bronze_count
    FROM brands b
    LEFT JOIN podium_votes v ON v.brand_id = b.id
"#;

const USER_AGGREGATE_SELECT: &str = r#"
    SELECT u.id AS id,
           typeof(u.points) AS points_type,
           CASE WHEN typeof(u.points) = 'text' THEN u.points END AS points_text,
           CASE WHEN typeof(u.points) IN ('integer', 'real') THEN CAST(u.points AS REAL) END AS points_num,
           u.power_level AS power_level,
           COUNT(v.id) AS vote_count
    FROM users u
    LEFT JOIN podium_votes v ON v.user_id = u.id
"#;

impl Repository {
    /// Aggregate current-season balances and vote counts for every entity of `kind`.
    ///
    /// When `ids` is given only those entities are aggregated.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row has an unexpected shape.
    pub async fn query_entity_aggregates(
        &self,
        kind: EntityKind,
        ids: Option<&[EntityId]>,
    ) -> Result<Vec<EntityAggregate>, StoreError> {
        if matches!(ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut builder = aggregate_query(kind, ids);
        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| decode_aggregate_row(kind, row))
            .collect()
    }

    /// Ordered, paginated aggregation for a SQL-orderable sort field.
    ///
    /// Ties are broken by id ascending.
    ///
    /// # Errors
    /// Returns an error if the query fails, a row has an unexpected shape, or the sort field
    /// is a point total.
    pub async fn query_live_page(
        &self,
        kind: EntityKind,
        query: &LiveQuery,
    ) -> Result<LivePage, StoreError> {
        let column = sort_column(query.sort_by).ok_or_else(|| {
            ValidationError::new(
                "sortBy",
                format!("{} is not orderable in SQL", query.sort_by.as_str()),
            )
        })?;

        if matches!(&query.ids, Some(ids) if ids.is_empty()) {
            return Ok(LivePage {
                rows: Vec::new(),
                total_count: 0,
            });
        }

        let ids = query.ids.as_deref();
        let total_count = self.count_entities(kind, ids).await?;

        let mut builder = aggregate_query(kind, ids);
        builder.push(" ORDER BY ");
        builder.push(column);
        builder.push(" ");
        builder.push(query.sort_order.as_sql());
        if query.sort_by != SortField::Id {
            builder.push(", id ASC");
        }
        builder.push(" LIMIT ");
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let rows = rows
            .iter()
            .map(|row| decode_aggregate_row(kind, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LivePage { rows, total_count })
    }

    /// Count entities of `kind`, optionally restricted to `ids`.
    pub async fn count_entities(
        &self,
        kind: EntityKind,
        ids: Option<&[EntityId]>,
    ) -> Result<i64, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM ");
        builder.push(entity_table(kind));
        if let Some(ids) = ids {
            builder.push(" WHERE id IN (");
            push_id_list(&mut builder, ids);
            builder.push(")");
        }

        let row = builder.build().fetch_one(&self.pool).await?;
        row.try_get::<i64, _>(0)
    }

    /// Standings in the most recent period recorded for `kind`, restricted to `ids`.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row has an unexpected shape.
    pub async fn query_period_standings(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, PeriodStanding>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT entity_id,
                   period_id,
                   typeof(points) AS points_type,
                   CASE WHEN typeof(points) = 'text' THEN points END AS points_text,
                   CASE WHEN typeof(points) IN ('integer', 'real') THEN CAST(points AS REAL) END AS points_num,
                   rank
            FROM period_standings
            WHERE entity_kind = "#,
        );
        builder.push_bind(kind.as_str());
        builder.push(
            " AND period_id = (SELECT MAX(period_id) FROM period_standings WHERE entity_kind = ",
        );
        builder.push_bind(kind.as_str());
        builder.push(") AND entity_id IN (");
        push_id_list(&mut builder, ids);
        builder.push(")");

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut standings = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id = decode_entity_id(row.try_get("entity_id")?)?;
            let standing = PeriodStanding {
                period_id: row.try_get("period_id")?,
                points: decode_points(row)?,
                rank: row.try_get("rank")?,
            };
            standings.insert(id, standing);
        }
        Ok(standings)
    }
}

#[async_trait]
impl LedgerSource for Repository {
    async fn fetch_entity_aggregates(
        &self,
        kind: EntityKind,
        ids: Option<&[EntityId]>,
    ) -> Result<Vec<EntityAggregate>, StoreError> {
        self.query_entity_aggregates(kind, ids).await
    }

    async fn fetch_live_page(
        &self,
        kind: EntityKind,
        query: &LiveQuery,
    ) -> Result<LivePage, StoreError> {
        self.query_live_page(kind, query).await
    }

    async fn fetch_period_standings(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, PeriodStanding>, StoreError> {
        self.query_period_standings(kind, ids).await
    }
}

fn aggregate_query(kind: EntityKind, ids: Option<&[EntityId]>) -> QueryBuilder<'static, Sqlite> {
    let (select, id_column) = match kind {
        EntityKind::Brand => (BRAND_AGGREGATE_SELECT, "b.id"),
        EntityKind::User => (USER_AGGREGATE_SELECT, "u.id"),
    };

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(select);
    if let Some(ids) = ids {
        builder.push(" WHERE ");
        builder.push(id_column);
        builder.push(" IN (");
        push_id_list(&mut builder, ids);
        builder.push(")");
    }
    builder.push(" GROUP BY ");
    builder.push(id_column);
    builder
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[EntityId]) {
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_i64());
    }
}

/// Column alias used for ordering by `field`; `None` for point totals.
fn sort_column(field: SortField) -> Option<&'static str> {
    match field {
        SortField::Id => Some("id"),
        SortField::GoldCount => Some("gold_count"),
        SortField::SilverCount => Some("silver_count"),
        SortField::BronzeCount => Some("bronze_count"),
        SortField::VoteCount => Some("vote_count"),
        SortField::PowerLevel => Some("power_level"),
        SortField::AllTimePoints | SortField::CurrentPoints => None,
    }
}

fn decode_entity_id(raw: i64) -> Result<EntityId, ValidationError> {
    EntityId::new(raw).map_err(|e| ValidationError::new("id", e.to_string()))
}

fn decode_count(row: &SqliteRow, column: &'static str) -> Result<i64, StoreError> {
    let value: i64 = row.try_get(column)?;
    if value < 0 {
        return Err(ValidationError::new(column, format!("negative count {}", value)).into());
    }
    Ok(value)
}

fn decode_points(row: &SqliteRow) -> Result<RawAmount, StoreError> {
    let storage_type: String = row.try_get("points_type")?;
    let text: Option<String> = row.try_get("points_text")?;
    let number: Option<f64> = row.try_get("points_num")?;
    Ok(RawAmount::decode_column(&storage_type, text, number)?)
}

fn decode_aggregate_row(kind: EntityKind, row: &SqliteRow) -> Result<EntityAggregate, StoreError> {
    let id = decode_entity_id(row.try_get("id")?)?;
    let current_points = decode_points(row)?;
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

    Ok(EntityAggregate {
        id,
        current_points,
        aggregates,
    })
}
