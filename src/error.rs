//! Error types for the gateway.
//!
//! Every variant maps to exactly one HTTP status code and a `{message}` JSON
//! body, per the status table the pipeline is built against. There is no
//! JSON-RPC envelope here — callers are browser clients speaking plain HTTP.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors, each carrying its own HTTP status.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request body, missing/unpriced model, non-http proxy
    /// target, or invalid similarity input. Status 400.
    #[error("{0}")]
    BadRequest(String),

    /// Missing bearer, signature-invalid token, salt-revoked token, or a
    /// non-JWT credential presented to an identity-restricted endpoint.
    /// Status 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Admin endpoint called by a non-admin identity. Status 403.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown route or unknown admin action. Status 404.
    #[error("{0}")]
    NotFound(String),

    /// Wrong HTTP method on a route that only accepts one. Status 405.
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Budget exceeded at admission. Status 429.
    #[error("{0}")]
    BudgetExceeded(String),

    /// Upstream or proxy I/O failure. Status 500.
    #[error("{0}")]
    Internal(String),

    /// Upstream fetch timed out (proxy pass-through only). Status 504.
    #[error("{0}")]
    UpstreamTimeout(String),

    /// Ledger (database) failure. Never surfaces to the client response —
    /// callers must log this and keep serving the response they already
    /// have; it exists as a variant only so the ledger's own methods can
    /// return `Result`.
    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    /// Transport-level failure talking to an upstream provider.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON where well-formed JSON was required.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Ledger(_) | Self::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
