//! Entities
//!
//! Persisted records of the request/offer/interest lifecycle and the
//! write-side inputs that create them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    AssetType, CancelledReason, DomainError, FlowType, InterestStatus, RequestStatus,
    RequestType, SchedulerJobStatus, SchedulerJobType,
};

/// Bounds for a derivative request's initial rate (inclusive)
pub const MIN_INITIAL_RATE: Decimal = Decimal::from_parts(3, 0, 0, false, 2);
pub const MAX_INITIAL_RATE: Decimal = Decimal::from_parts(3, 0, 0, false, 1);

// =========================================================================
// LoanPackageRequest
// =========================================================================

/// An investor's ask to borrow against a symbol on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPackageRequest {
    pub id: i64,
    pub symbol_id: i64,
    pub investor_id: i64,
    pub account_no: String,
    /// Zero for derivative requests
    pub loan_rate: Decimal,
    /// Zero for derivative requests
    pub limit_amount: Decimal,
    pub request_type: RequestType,
    pub asset_type: AssetType,
    pub initial_rate: Option<Decimal>,
    pub contract_size: Option<i64>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanPackageRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Fails with `RequestFinalized` unless the request is still open.
    pub fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(DomainError::RequestFinalized {
                request_id: self.id,
                status: self.status,
            })
        }
    }
}

/// Terms an investor asks for, by asset type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "asset_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestTerms {
    Underlying {
        loan_rate: Decimal,
        limit_amount: Decimal,
    },
    Derivative {
        initial_rate: Decimal,
        contract_size: i64,
    },
}

impl RequestTerms {
    pub fn asset_type(&self) -> AssetType {
        match self {
            RequestTerms::Underlying { .. } => AssetType::Underlying,
            RequestTerms::Derivative { .. } => AssetType::Derivative,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            RequestTerms::Underlying {
                loan_rate,
                limit_amount,
            } => {
                if *loan_rate <= Decimal::ZERO || *loan_rate >= Decimal::ONE {
                    return Err(DomainError::validation(format!(
                        "loan rate must be within (0, 1), got {}",
                        loan_rate
                    )));
                }
                if *limit_amount <= Decimal::ZERO {
                    return Err(DomainError::validation("limit amount must be positive"));
                }
            }
            RequestTerms::Derivative {
                initial_rate,
                contract_size,
            } => {
                if *initial_rate < MIN_INITIAL_RATE || *initial_rate > MAX_INITIAL_RATE {
                    return Err(DomainError::validation(format!(
                        "initial rate must be within [{}, {}], got {}",
                        MIN_INITIAL_RATE, MAX_INITIAL_RATE, initial_rate
                    )));
                }
                if *contract_size <= 0 {
                    return Err(DomainError::validation("contract size must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// Write-side input for a new request. Always created PENDING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoanPackageRequest {
    pub symbol_id: i64,
    pub investor_id: i64,
    pub account_no: String,
    pub request_type: RequestType,
    pub terms: RequestTerms,
}

impl NewLoanPackageRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.account_no.trim().is_empty() {
            return Err(DomainError::validation("account number is required"));
        }
        self.terms.validate()
    }

    /// Materialise the row that a store will persist under `id`.
    pub fn into_request(self, id: i64, now: DateTime<Utc>) -> LoanPackageRequest {
        let asset_type = self.terms.asset_type();
        let (loan_rate, limit_amount, initial_rate, contract_size) = match self.terms {
            RequestTerms::Underlying {
                loan_rate,
                limit_amount,
            } => (loan_rate, limit_amount, None, None),
            RequestTerms::Derivative {
                initial_rate,
                contract_size,
            } => (Decimal::ZERO, Decimal::ZERO, Some(initial_rate), Some(contract_size)),
        };

        LoanPackageRequest {
            id,
            symbol_id: self.symbol_id,
            investor_id: self.investor_id,
            account_no: self.account_no,
            loan_rate,
            limit_amount,
            request_type: self.request_type,
            asset_type,
            initial_rate,
            contract_size,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

// =========================================================================
// LoanPackageOffer / LoanPackageOfferInterest
// =========================================================================

/// One admin-proposed set of terms against a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPackageOffer {
    pub id: i64,
    pub request_id: i64,
    pub offered_by: String,
    pub flow_type: FlowType,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LoanPackageOffer {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.map_or(false, |at| at < now)
    }
}

/// One candidate loan package within an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPackageOfferInterest {
    pub id: i64,
    pub offer_id: i64,
    pub request_id: i64,
    /// Loan package (product) this line offers
    pub loan_id: i64,
    pub score_group_id: Option<i64>,
    pub limit_amount: Decimal,
    pub loan_rate: Decimal,
    pub interest_rate: Decimal,
    pub term_days: i32,
    pub status: InterestStatus,
    pub cancelled_reason: CancelledReason,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub contract_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Write-side input for one interest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOfferInterest {
    pub loan_id: i64,
    #[serde(default)]
    pub score_group_id: Option<i64>,
    pub limit_amount: Decimal,
    pub loan_rate: Decimal,
    pub interest_rate: Decimal,
    pub term_days: i32,
}

impl NewOfferInterest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.limit_amount <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "loan {}: limit amount must be positive",
                self.loan_id
            )));
        }
        for (name, rate) in [("loan rate", self.loan_rate), ("interest rate", self.interest_rate)] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(DomainError::validation(format!(
                    "loan {}: {} must be within [0, 1], got {}",
                    self.loan_id, name, rate
                )));
            }
        }
        if self.term_days <= 0 {
            return Err(DomainError::validation(format!(
                "loan {}: term must be positive",
                self.loan_id
            )));
        }
        Ok(())
    }

    pub fn into_interest(
        self,
        id: i64,
        offer_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> LoanPackageOfferInterest {
        LoanPackageOfferInterest {
            id,
            offer_id,
            request_id,
            loan_id: self.loan_id,
            score_group_id: self.score_group_id,
            limit_amount: self.limit_amount,
            loan_rate: self.loan_rate,
            interest_rate: self.interest_rate,
            term_days: self.term_days,
            status: InterestStatus::Pending,
            cancelled_reason: CancelledReason::Unknown,
            cancelled_by: None,
            cancelled_at: None,
            contract_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Write-side input for an offer header. Lines are created separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoanPackageOffer {
    pub request_id: i64,
    pub offered_by: String,
    pub flow_type: FlowType,
    pub expired_at: Option<DateTime<Utc>>,
}

/// An offer joined with its request and lines, newest line first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferWithDetails {
    pub offer: LoanPackageOffer,
    pub request: LoanPackageRequest,
    pub interests: Vec<LoanPackageOfferInterest>,
}

/// Snapshot of the policy terms an admin submitted in the new-submission flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionSheet {
    pub id: i64,
    pub request_id: i64,
    pub submitted_by: String,
    pub terms: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// =========================================================================
// LoanContract
// =========================================================================

/// Binding contract, created once per accepted interest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanContract {
    pub id: i64,
    pub request_id: i64,
    pub interest_id: i64,
    pub investor_id: i64,
    pub account_no: String,
    pub symbol_id: i64,
    pub loan_id: i64,
    pub guarantee_ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLoanContract {
    pub request_id: i64,
    pub interest_id: i64,
    pub investor_id: i64,
    pub account_no: String,
    pub symbol_id: i64,
    pub loan_id: i64,
}

impl NewLoanContract {
    pub fn for_line(request: &LoanPackageRequest, interest: &LoanPackageOfferInterest) -> Self {
        Self {
            request_id: request.id,
            interest_id: interest.id,
            investor_id: request.investor_id,
            account_no: request.account_no.clone(),
            symbol_id: request.symbol_id,
            loan_id: interest.loan_id,
        }
    }
}

// =========================================================================
// Scheduler records
// =========================================================================

/// Effective-dated risk ceiling for pending requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRequestSchedulerConfig {
    pub id: i64,
    pub maximum_loan_rate: Decimal,
    pub affected_from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerJob {
    pub id: i64,
    pub job_type: SchedulerJobType,
    pub status: SchedulerJobStatus,
    pub triggered_by: String,
    pub tracking_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedulerJob {
    pub job_type: SchedulerJobType,
    pub status: SchedulerJobStatus,
    pub triggered_by: String,
    pub tracking_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn derivative(initial_rate: Decimal, contract_size: i64) -> RequestTerms {
        RequestTerms::Derivative {
            initial_rate,
            contract_size,
        }
    }

    #[test]
    fn test_initial_rate_bounds() {
        assert_eq!(MIN_INITIAL_RATE, dec!(0.03));
        assert_eq!(MAX_INITIAL_RATE, dec!(0.3));
    }

    #[test]
    fn test_derivative_initial_rate_is_inclusive() {
        assert!(derivative(dec!(0.03), 1).validate().is_ok());
        assert!(derivative(dec!(0.3), 1).validate().is_ok());
        assert!(derivative(dec!(0.029), 1).validate().is_err());
        assert!(derivative(dec!(0.31), 1).validate().is_err());
    }

    #[test]
    fn test_derivative_contract_size_must_be_positive() {
        let err = derivative(dec!(0.1), 0).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_underlying_terms() {
        let ok = RequestTerms::Underlying {
            loan_rate: dec!(0.25),
            limit_amount: dec!(1000000),
        };
        assert!(ok.validate().is_ok());

        let zero_limit = RequestTerms::Underlying {
            loan_rate: dec!(0.25),
            limit_amount: Decimal::ZERO,
        };
        assert!(zero_limit.validate().is_err());
    }

    #[test]
    fn test_derivative_request_zeroes_loan_rate() {
        let new = NewLoanPackageRequest {
            symbol_id: 1,
            investor_id: 2,
            account_no: "0001".to_string(),
            request_type: RequestType::Flexible,
            terms: derivative(dec!(0.1), 5),
        };
        let request = new.into_request(9, Utc::now());

        assert_eq!(request.asset_type, AssetType::Derivative);
        assert_eq!(request.loan_rate, Decimal::ZERO);
        assert_eq!(request.initial_rate, Some(dec!(0.1)));
        assert_eq!(request.contract_size, Some(5));
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[test]
    fn test_request_terms_json_shape() {
        let terms: RequestTerms = serde_json::from_value(serde_json::json!({
            "asset_type": "UNDERLYING",
            "loan_rate": "0.25",
            "limit_amount": "500000"
        }))
        .unwrap();
        assert_eq!(terms.asset_type(), AssetType::Underlying);
    }

    #[test]
    fn test_interest_line_validation() {
        let line = NewOfferInterest {
            loan_id: 77,
            score_group_id: None,
            limit_amount: dec!(100),
            loan_rate: dec!(0.5),
            interest_rate: dec!(0.12),
            term_days: 90,
        };
        assert!(line.validate().is_ok());

        let bad_term = NewOfferInterest {
            term_days: 0,
            ..line.clone()
        };
        assert!(bad_term.validate().is_err());

        let bad_rate = NewOfferInterest {
            interest_rate: dec!(1.5),
            ..line
        };
        assert!(bad_rate.validate().is_err());
    }

    #[test]
    fn test_offer_expiry() {
        let now = Utc::now();
        let offer = LoanPackageOffer {
            id: 1,
            request_id: 1,
            offered_by: "admin".to_string(),
            flow_type: FlowType::Online,
            expired_at: Some(now - chrono::Duration::hours(1)),
            created_at: now,
        };
        assert!(offer.is_expired_at(now));

        let open = LoanPackageOffer {
            expired_at: None,
            ..offer
        };
        assert!(!open.is_expired_at(now));
    }
}
