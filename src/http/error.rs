use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use ulid::Ulid;

use crate::consistency::ConsistencyError;
use crate::model::{EntityKind, FieldError};

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

impl ApiError {
    pub fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug)]
pub enum AppError {
    Consistency(ConsistencyError),
    /// Malformed path, query or body.
    BadRequest(String),
    /// A missing target on a route that reports it as a bad request.
    UnknownTarget { kind: EntityKind, id: Ulid },
}

impl AppError {
    pub fn missing_is_bad_request(self) -> Self {
        match self {
            AppError::Consistency(ConsistencyError::NotFound { kind, id }) => {
                AppError::UnknownTarget { kind, id }
            }
            other => other,
        }
    }
}

impl From<ConsistencyError> for AppError {
    fn from(err: ConsistencyError) -> Self {
        AppError::Consistency(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("VALIDATION_ERROR", msg),
            ),
            AppError::UnknownTarget { kind, id } => (
                StatusCode::BAD_REQUEST,
                ApiError::new("NOT_FOUND", format!("{kind} not found: {id}")),
            ),
            AppError::Consistency(err) => match err {
                ConsistencyError::Validation(fields) => (
                    StatusCode::BAD_REQUEST,
                    ApiError::new("VALIDATION_ERROR", "validation failed").with_details(fields),
                ),
                ConsistencyError::Conflict { conflicting, .. } => (
                    StatusCode::BAD_REQUEST,
                    ApiError::new("CONFLICT", "bed unavailable for that window").with_details(vec![
                        FieldError::new("bedId", format!("overlaps reservation {conflicting}")),
                    ]),
                ),
                ConsistencyError::Blocked(reason) => (
                    StatusCode::BAD_REQUEST,
                    ApiError::new("REFERENTIAL_BLOCK", reason.to_string()),
                ),
                ConsistencyError::NotFound { .. } => (
                    StatusCode::NOT_FOUND,
                    ApiError::new("NOT_FOUND", err.to_string()),
                ),
                ConsistencyError::Store(e) => {
                    tracing::error!("store failure: {e}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiError::new("STORE_ERROR", e.to_string()),
                    )
                }
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::BlockReason;
    use crate::store::StoreError;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_of(ConsistencyError::field("name", "is required")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConsistencyError::Conflict {
                bed_id: Ulid::new(),
                conflicting: Ulid::new()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConsistencyError::Blocked(BlockReason::ServiceHasBeds(2))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConsistencyError::NotFound {
                kind: EntityKind::Bed,
                id: Ulid::new()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ConsistencyError::Store(StoreError::Timeout)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_target_can_be_a_bad_request() {
        let err = AppError::from(ConsistencyError::NotFound {
            kind: EntityKind::Reservation,
            id: Ulid::new(),
        });
        assert_eq!(
            err.missing_is_bad_request().into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn empty_details_are_omitted() {
        let body = serde_json::to_value(ApiError::new("NOT_FOUND", "bed not found")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "error": "NOT_FOUND", "message": "bed not found" })
        );
    }
}
