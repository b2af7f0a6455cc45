//! Derived request status
//!
//! A request's dashboard status is not stored. It is reduced from the
//! statuses of every interest line across the request's offers.

use serde::{Deserialize, Serialize};

use super::{CancelledReason, InterestStatus, LoanPackageOfferInterest, LoanPackageRequest};

/// Request-level status computed from its interest lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombinedStatus {
    Pending,
    CreatingLoanPackage,
    Signed,
    PackageCreated,
    Cancelled { reason: CancelledReason },
}

impl CombinedStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CombinedStatus::Cancelled { .. })
    }
}

/// A request as shown to admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedLoanRequest {
    #[serde(flatten)]
    pub request: LoanPackageRequest,
    pub combined_status: CombinedStatus,
    pub interest_count: usize,
}

impl CombinedLoanRequest {
    pub fn new(request: LoanPackageRequest, interests: &[LoanPackageOfferInterest]) -> Self {
        let combined_status = derive_combined_status(&request, interests);
        Self {
            request,
            combined_status,
            interest_count: interests.len(),
        }
    }
}

/// Reduce interest statuses with priority
/// PACKAGE_CREATED > SIGNED > CREATING_LOAN_PACKAGE > PENDING > CANCELLED.
///
/// A request with no lines yet mirrors its own status: PENDING stays
/// pending, anything else reads as an admin cancellation. Requests carry no
/// close reason, so one risk-declined before any offer also reads ADMIN; the
/// decline is recorded in the job's `declined_request_ids` instead.
pub fn derive_combined_status(
    request: &LoanPackageRequest,
    interests: &[LoanPackageOfferInterest],
) -> CombinedStatus {
    if interests.is_empty() {
        return if request.is_pending() {
            CombinedStatus::Pending
        } else {
            CombinedStatus::Cancelled {
                reason: CancelledReason::Admin,
            }
        };
    }

    let has = |status: InterestStatus| interests.iter().any(|i| i.status == status);

    if has(InterestStatus::PackageCreated) {
        CombinedStatus::PackageCreated
    } else if has(InterestStatus::Signed) {
        CombinedStatus::Signed
    } else if has(InterestStatus::CreatingLoanPackage) {
        CombinedStatus::CreatingLoanPackage
    } else if has(InterestStatus::Pending) {
        CombinedStatus::Pending
    } else {
        CombinedStatus::Cancelled {
            reason: latest_cancel_reason(interests),
        }
    }
}

/// Most recent non-UNKNOWN reason, ADMIN when none was recorded.
pub fn latest_cancel_reason(interests: &[LoanPackageOfferInterest]) -> CancelledReason {
    interests
        .iter()
        .filter(|i| i.cancelled_reason != CancelledReason::Unknown)
        .max_by_key(|i| (i.cancelled_at.unwrap_or(i.updated_at), i.id))
        .map(|i| i.cancelled_reason)
        .unwrap_or(CancelledReason::Admin)
}
