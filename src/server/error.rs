//! HTTP mapping of pipeline errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::{Error, ErrorKind, LedgerStateError};

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    /// Whether the same request may succeed later
    pub retryable: bool,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::Validation(message) => message.clone(),
            other => other.to_string(),
        };

        Self {
            error: message,
            kind: err.kind(),
            retryable: err.is_retryable_later(),
        }
    }
}

/// Status code for an error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::LedgerState(LedgerStateError::BeatNotFound(_)) => StatusCode::NOT_FOUND,
        Error::LedgerState(LedgerStateError::Malformed(_) | LedgerStateError::Corrupt { .. }) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Error::LedgerState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = %self.kind(), error = %self, "Request failed");
        }

        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
