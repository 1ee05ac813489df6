//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`RelayError`] so that relay handlers can
//! return `Result<Response, RelayError>` directly. Upstream failures become
//! 502/504 with a plain-text explanation.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::streaming::RelayError;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Upstream error in relay handler");
        } else {
            tracing::debug!(status = %status, error = %self, "Rejected relay request");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}
