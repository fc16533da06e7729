use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::AppState;
use crate::domain::{EntityId, EntityKind, SortField, SortOrder, TimeMs};
use crate::error::AppError;
use crate::orchestration::leaderboard::{LeaderboardPage, LeaderboardRequest, DEFAULT_PAGE_SIZE};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub ids: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    pub kind: EntityKind,
    pub fresh: bool,
    pub expires_at_ms: Option<i64>,
    pub refreshed_at_ms: Option<i64>,
    pub row_count: Option<i64>,
}

pub async fn get_leaderboard(
    Path(kind): Path<String>,
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<LeaderboardPage>, AppError> {
    let kind = parse_kind(&kind)?;
    let request = parse_request(params)?;

    let page = state.service.get_leaderboard(kind, &request).await?;
    Ok(Json(page))
}

pub async fn get_status(
    Path(kind): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SnapshotStatus>, AppError> {
    let kind = parse_kind(&kind)?;
    let meta = state.service.refresh().status(kind).await?;
    let now = TimeMs::now();

    Ok(Json(SnapshotStatus {
        kind,
        fresh: meta.as_ref().map_or(false, |m| m.is_fresh_at(now)),
        expires_at_ms: meta.as_ref().map(|m| m.expires_at.as_i64()),
        refreshed_at_ms: meta.as_ref().map(|m| m.refreshed_at.as_i64()),
        row_count: meta.as_ref().map(|m| m.row_count),
    }))
}

fn parse_kind(raw: &str) -> Result<EntityKind, AppError> {
    EntityKind::from_str(raw)
        .map_err(|_| AppError::NotFound(format!("unknown leaderboard {}", raw)))
}

fn parse_request(params: LeaderboardQuery) -> Result<LeaderboardRequest, AppError> {
    let sort_by = match params.sort_by.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => SortField::from_str(s)
            .map_err(|_| AppError::BadRequest(format!("Invalid sortBy: {}", s)))?,
        None => SortField::CANONICAL,
    };
    let sort_order = match params.sort_order.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => SortOrder::from_str(s)
            .map_err(|_| AppError::BadRequest("sortOrder must be asc or desc".to_string()))?,
        None => SortOrder::Desc,
    };

    Ok(LeaderboardRequest {
        page: params.page.unwrap_or(1),
        page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        sort_by,
        sort_order,
        ids: params.ids.as_deref().map(parse_ids).transpose()?.flatten(),
    })
}

/// Comma-separated id filter. A blank value means no filter.
fn parse_ids(raw: &str) -> Result<Option<Vec<EntityId>>, AppError> {
    let mut ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            EntityId::from_str(s).map_err(|_| AppError::BadRequest(format!("Invalid id: {}", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Ok(None);
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(Some(ids))
}
