//! HTTP error responses.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use tally_core::{AggregationError, ErrorCategory, ErrorReport};

/// An engine error on its way to the client
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AggregationError);

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Cancelled => StatusCode::CONFLICT,
            ErrorCategory::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AggregationError::validation("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(AggregationError::validation("query", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(AggregationError::validation("path", rejection.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorReport,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        let body = ErrorBody {
            error: ErrorReport::from(&self.0),
        };
        (status, Json(body)).into_response()
    }
}
