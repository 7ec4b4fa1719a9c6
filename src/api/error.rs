//! API error types and their HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::admission::RejectReason;
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or missing agent id; never reaches the engine
    InvalidRequest(String),

    NotFound(String),

    /// Turned away by admission control
    Rejected(RejectReason),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Rejected(RejectReason::RateExceeded) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Rejected(RejectReason::PayloadTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Rejected(RejectReason::UnknownAgentBlocked) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ApiError::Rejected(reason) => json!({
                "status": "rejected",
                "reason": reason,
            }),
            ApiError::InvalidRequest(msg) | ApiError::NotFound(msg) => json!({ "error": msg }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<RejectReason> for ApiError {
    fn from(reason: RejectReason) -> Self {
        ApiError::Rejected(reason)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
        }
    }
}
