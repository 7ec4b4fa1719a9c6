//! Report submission

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::State,
    http::StatusCode,
};
use tracing::{trace, warn};

use crate::admission::RejectReason;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{IngestRequest, IngestResponse},
};
use crate::engine::{ReportSubmission, SubmitOutcome};

/// POST /api/v1/reports
///
/// Also mounted as `POST /api/metrics`. The body is read raw, at most one
/// byte past `max_payload_bytes`, so admission sees the size actually
/// received and oversized bodies get the same rejection at any size.
pub async fn submit_report(
    State(state): State<ApiState>,
    body: Body,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let limit = state
        .engine
        .config()
        .admission
        .max_payload_bytes
        .saturating_add(1);

    // a body that cannot be read within the limit is treated as oversized
    let body = to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::Rejected(RejectReason::PayloadTooLarge))?;
    let size = body.len();

    let request: IngestRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("malformed report: {e}")))?;

    if request.agent_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("agent_id must not be empty".to_string()));
    }

    trace!(agent_id = %request.agent_id, size, "report received");

    let outcome = state.engine.submit(ReportSubmission {
        agent_id: request.agent_id,
        sequence: request.sequence,
        payload: request.payload,
        size,
    })?;

    let response = match outcome {
        SubmitOutcome::Queued => IngestResponse::queued(),
        SubmitOutcome::Dropped(reason) => {
            warn!(%reason, "report accepted but dropped");
            IngestResponse::not_queued(reason.as_str())
        }
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

