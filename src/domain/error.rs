//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::{FlowType, InterestStatus, RequestStatus};

/// Business rule violations and domain invariant failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Input rejected before any state is touched
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The interest line's status does not permit the requested move
    #[error("Invalid transition for {flow} offer: {from} -> {to}")]
    InvalidTransition {
        from: InterestStatus,
        to: InterestStatus,
        flow: FlowType,
    },

    /// The request has already been processed
    #[error("Request {request_id} is already {status}")]
    RequestFinalized {
        request_id: i64,
        status: RequestStatus,
    },

    /// The offer's acceptance window has closed
    #[error("Offer {offer_id} has expired")]
    OfferExpired { offer_id: i64 },

    /// Persisted text does not name a known variant
    #[error("Unknown {kind}: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },

    /// Actor is not allowed to touch the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownVariant { .. } | Self::Forbidden(_)
        )
    }

    /// The target is already in a state that cannot move any further
    pub fn is_already_finalized(&self) -> bool {
        match self {
            Self::InvalidTransition { from, .. } => from.is_terminal(),
            Self::RequestFinalized { .. } | Self::OfferExpired { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = DomainError::validation("initial rate out of range");
        assert!(err.is_client_error());
        assert!(err.to_string().contains("initial rate"));
    }

    #[test]
    fn test_invalid_transition_from_terminal_is_finalized() {
        let err = DomainError::InvalidTransition {
            from: InterestStatus::Signed,
            to: InterestStatus::Cancelled,
            flow: FlowType::Online,
        };
        assert!(err.is_already_finalized());
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Invalid transition for ONLINE offer: SIGNED -> CANCELLED"
        );
    }

    #[test]
    fn test_expired_offer_is_finalized() {
        let err = DomainError::OfferExpired { offer_id: 4 };
        assert!(err.is_already_finalized());
        assert!(!err.is_client_error());
        assert_eq!(err.to_string(), "Offer 4 has expired");
    }

    #[test]
    fn test_gated_transition_is_not_finalized() {
        let err = DomainError::InvalidTransition {
            from: InterestStatus::Pending,
            to: InterestStatus::PackageCreated,
            flow: FlowType::Unspecified,
        };
        assert!(!err.is_already_finalized());
    }
}
