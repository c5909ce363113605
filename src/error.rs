// =============================================================================
// Crate-wide error taxonomy
// =============================================================================
//
// Lower-level plumbing (DB, HTTP, filesystem) returns `anyhow::Result`, as the
// teacher's `runtime_config.rs` and `binance/client.rs` do. `AppError` is the
// narrower, classified error every component-facing operation converts to at
// its boundary, matching the error kinds enumerated by the design.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("authentication required")]
    Auth,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("provider call failed: {0}")]
    ProviderCallFailed(String),

    #[error("exchange call failed: {0}")]
    ExchangeCallFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Auth => "auth",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Integrity(_) => "integrity",
            Self::ProviderCallFailed(_) => "provider_call_failed",
            Self::ExchangeCallFailed(_) => "exchange_call_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::EncryptionFailed(_) => "encryption_failed",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Integrity(_) => StatusCode::CONFLICT,
            Self::ProviderCallFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ExchangeCallFailed(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EncryptionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        // Validation responses additionally carry a `fields` list per spec
        // §7, even though today only ever one field fails at a time.
        if let Self::Validation { field, message } = &self {
            error["fields"] = json!([{ "field": field, "message": message }]);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::Error as E;
        match err {
            E::QueryReturnedNoRows => Self::NotFound("row not found".into()),
            E::SqliteFailure(e, ref msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Self::Conflict(msg.clone().unwrap_or_else(|| "constraint violation".into()))
            }
            other => Self::PersistenceFailed(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
