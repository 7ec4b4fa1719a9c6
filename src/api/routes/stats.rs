//! Hub counters

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Agent and subscriber counts plus ingest counters since startup
pub async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        engine: state.engine.stats(),
    })
}
