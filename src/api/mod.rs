pub mod health;
pub mod leaderboard;

use crate::orchestration::LeaderboardService;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LeaderboardService>,
}

impl AppState {
    pub fn new(service: Arc<LeaderboardService>) -> Self {
        Self { service }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/leaderboard/:kind", get(leaderboard::get_leaderboard))
        .route("/v1/leaderboard/:kind/status", get(leaderboard::get_status))
        .layer(cors)
        .with_state(state)
}
