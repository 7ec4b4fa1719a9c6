//! Read access to aggregated agent state

use axum::{
    Json,
    extract::{Path, State},
};

use crate::AgentState;
use crate::api::{error::ApiResult, state::ApiState, types::AgentsResponse};

/// GET /api/v1/agents
///
/// Also mounted as `GET /api/metrics`
pub async fn list_agents(State(state): State<ApiState>) -> Json<AgentsResponse> {
    let agents = state.engine.snapshot().await;
    Json(AgentsResponse {
        count: agents.len(),
        agents,
    })
}

/// GET /api/v1/agents/:id
pub async fn get_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentState>> {
    Ok(Json(state.engine.get(&agent_id).await?))
}
