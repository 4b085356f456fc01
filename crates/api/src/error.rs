//! HTTP error mapping

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use prediction_service::ServiceError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(e) if e.is_invalid_request() => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::NotReady(_)) => StatusCode::CONFLICT,
            ApiError::Service(ServiceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Service(e) => e.kind(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), detail = %self, "Request failed");
        } else {
            tracing::debug!(kind = self.kind(), detail = %self, "Request rejected");
        }

        let body = Json(json!({
            "status": "error",
            "kind": self.kind(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
