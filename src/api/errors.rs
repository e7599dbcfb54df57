use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::errors::LmsError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// Lock or transaction contention; the same request may be retried.
    RetryableConflict(String),
    TooManyRequests(&'static str),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<LmsError> for ApiError {
    fn from(err: LmsError) -> Self {
        match err {
            LmsError::Validation { .. } | LmsError::ScoreOutOfRange { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            LmsError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            LmsError::Forbidden(message) => ApiError::Forbidden(message),
            LmsError::ExamNotActive(_)
            | LmsError::AttemptClosed
            | LmsError::AttemptNotSubmitted
            | LmsError::NotFullyGraded
            | LmsError::DuplicateAttempt
            | LmsError::ConcurrentModification => {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "Concurrent modification detected");
                    ApiError::RetryableConflict(err.to_string())
                } else {
                    ApiError::Conflict(err.to_string())
                }
            }
            LmsError::Storage(source) => ApiError::internal(source, "Database operation failed"),
        }
    }
}

fn json_error(status: StatusCode, detail: String) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let mut response = json_error(StatusCode::UNAUTHORIZED, message.to_string());
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => json_error(StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => json_error(StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => json_error(StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => json_error(StatusCode::CONFLICT, message),
            ApiError::RetryableConflict(message) => {
                let mut response = json_error(StatusCode::CONFLICT, message);
                response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                response
            }
            ApiError::TooManyRequests(message) => {
                json_error(StatusCode::TOO_MANY_REQUESTS, message.to_string())
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lms_errors_map_to_status_codes() {
        let cases = [
            (LmsError::validation("points", "must be positive"), StatusCode::BAD_REQUEST),
            (LmsError::ScoreOutOfRange { score: 11.0, max: Some(10.0) }, StatusCode::BAD_REQUEST),
            (LmsError::ExamNotActive("draft".to_string()), StatusCode::CONFLICT),
            (LmsError::AttemptClosed, StatusCode::CONFLICT),
            (LmsError::DuplicateAttempt, StatusCode::CONFLICT),
            (LmsError::NotFound("Attempt"), StatusCode::NOT_FOUND),
            (LmsError::Forbidden("nope"), StatusCode::FORBIDDEN),
            (LmsError::Storage(sqlx::Error::RowNotFound), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
            assert!(response.headers().get(header::RETRY_AFTER).is_none());
        }
    }

    #[test]
    fn concurrent_modification_carries_retry_hint() {
        let response = ApiError::from(LmsError::ConcurrentModification).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
