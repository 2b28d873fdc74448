//! HTTP error responses.
//!
//! Every failure serializes as `{"detail": "..."}` with a matching status
//! code, so clients get one uniform error shape across the API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// 503: the model failed to load or is not available
    ModelUnavailable,
    /// 404: unknown task ID
    NotFound(String),
    /// 422: request payload failed validation
    Validation(String),
    /// 500: anything else
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::ModelUnavailable => "Model not loaded",
            Self::NotFound(msg) | Self::Validation(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(msg) = &self {
            log::error!("{}", msg);
        }
        (self.status(), Json(json!({ "detail": self.detail() }))).into_response()
    }
}
