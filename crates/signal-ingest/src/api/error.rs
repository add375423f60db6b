//! Mapping of errors onto HTTP responses.

use crate::error::IngestError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// An error returned by a handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized")
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

/// HTTP status for an ingestion error.
pub fn status_for(err: &IngestError) -> StatusCode {
    match err {
        IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IngestError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        IngestError::StorageUnavailable(_) | IngestError::Pool { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        // A row's content was rejected (constraint, type range)
        IngestError::InsertFailed { row: Some(_), .. } => StatusCode::BAD_REQUEST,
        // The upload record or row statement was rejected: a schema fault
        IngestError::InsertFailed { row: None, .. } => StatusCode::INTERNAL_SERVER_ERROR,
        e if e.is_input_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!("{}", err.format_detailed());
        } else {
            warn!("rejected: {}", err);
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&IngestError::UnknownColumn { column: "x".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&IngestError::RowWidthMismatch {
                row: 1,
                expected: 2,
                found: 1
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&IngestError::insert(1, "not-null")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&IngestError::upload_insert("relation \"source_file\" does not exist")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&IngestError::prepare_rows("column \"order_ref\" does not exist")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&IngestError::PayloadTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&IngestError::Timeout { seconds: 30 }),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_for(&IngestError::StorageUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&IngestError::CommitFailed("fk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_ingest_error_keeps_code() {
        let err = ApiError::from(IngestError::EmptySchema);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "empty_schema");
    }
}
