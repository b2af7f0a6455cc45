//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Another transaction holds the offer; the caller may retry
    #[error("{entity} {id} is already being processed, retry later")]
    OfferBusy { entity: &'static str, id: i64 },

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => AppError::NotFound { entity, id },
            StoreError::LockConflict { entity, id } => AppError::OfferBusy { entity, id },
            StoreError::Duplicate { .. } | StoreError::Decode { .. } | StoreError::Database(_) => {
                AppError::Storage(err.to_string())
            }
        }
    }
}

impl AppError {
    /// Lock contention: safe for the caller to try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::OfferBusy { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// The target can no longer move, as opposed to being busy.
    pub fn is_already_finalized(&self) -> bool {
        matches!(self, AppError::Domain(e) if e.is_already_finalized())
    }

    /// Stable machine-readable code and HTTP status.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) | AppError::MissingHeader(_) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AppError::OfferBusy { .. } => (StatusCode::CONFLICT, "offer_busy"),
            AppError::Domain(domain_err) => match domain_err {
                DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                DomainError::UnknownVariant { .. } => (StatusCode::BAD_REQUEST, "unknown_variant"),
                DomainError::InvalidTransition { .. }
                | DomainError::RequestFinalized { .. }
                | DomainError::OfferExpired { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                DomainError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            },
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.classify();

        let details = match &self {
            AppError::InvalidRequest(msg) => Some(msg.clone()),
            AppError::MissingHeader(header) => Some(header.clone()),
            AppError::Domain(e) if e.is_already_finalized() => Some("already_finalized".to_string()),
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                None
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                None
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                None
            }
            _ => None,
        };

        // don't leak storage internals to callers
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            retryable: self.is_retryable(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FlowType, InterestStatus};

    #[test]
    fn test_store_errors_stay_distinct() {
        let busy: AppError = StoreError::lock_conflict("offer", 3).into();
        assert!(busy.is_retryable());
        assert_eq!(busy.classify(), (StatusCode::CONFLICT, "offer_busy"));

        let missing: AppError = StoreError::not_found("offer", 3).into();
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());
        assert_eq!(missing.classify(), (StatusCode::NOT_FOUND, "not_found"));
    }

    #[test]
    fn test_finalized_is_not_retryable() {
        let err = AppError::Domain(DomainError::InvalidTransition {
            from: InterestStatus::PackageCreated,
            to: InterestStatus::Cancelled,
            flow: FlowType::Online,
        });
        assert!(err.is_already_finalized());
        assert!(!err.is_retryable());
        assert_eq!(err.classify(), (StatusCode::CONFLICT, "invalid_transition"));
    }

    #[test]
    fn test_decode_errors_are_storage_errors() {
        let err: AppError = StoreError::Decode {
            table: "loan_package_offer_interests",
            source: DomainError::unknown_variant("offer interest status", "ACTIVE"),
        }
        .into();
        assert_eq!(
            err.classify(),
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
        );
    }

    #[test]
    fn test_validation_maps_to_400() {
        let err = AppError::Domain(DomainError::validation("bad rate"));
        assert_eq!(err.classify(), (StatusCode::BAD_REQUEST, "validation_error"));
    }
}
