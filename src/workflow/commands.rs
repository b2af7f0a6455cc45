//! Command definitions
//!
//! Commands represent intentions to change the lifecycle state; results
//! describe what the transition actually did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CombinedLoanRequest, CombinedStatus, FlowType, LoanContract, LoanPackageOffer,
    LoanPackageOfferInterest, NewOfferInterest, RequestStatus,
    RequestTerms, RequestType, SubmissionSheet,
};

// =========================================================================
// CreateRequestCommand
// =========================================================================

/// Investor (or admin-assisted) request for a loan package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestCommand {
    pub symbol_id: i64,
    pub investor_id: i64,
    pub account_no: String,
    pub request_type: RequestType,
    #[serde(flatten)]
    pub terms: RequestTerms,
}

// =========================================================================
// ProposeOfferCommand
// =========================================================================

/// Admin proposes a brand-new package against a pending request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeOfferCommand {
    pub request_id: i64,
    pub flow_type: FlowType,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    /// Policy terms snapshot stored on the submission sheet
    #[serde(default)]
    pub terms: serde_json::Value,
    pub interests: Vec<NewOfferInterest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposeOfferResult {
    pub submission_sheet: SubmissionSheet,
    pub offer: LoanPackageOffer,
    pub interests: Vec<LoanPackageOfferInterest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_error: Option<String>,
}

// =========================================================================
// Accept / confirm
// =========================================================================

/// Admin confirms a request against one loan product already offered on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfirmCommand {
    pub request_id: i64,
    pub loan_id: i64,
}

/// Investor accepts one line of an online offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorAcceptCommand {
    pub offer_id: i64,
    pub interest_id: i64,
}

/// Outcome of any accept path
#[derive(Debug, Clone, Serialize)]
pub struct AcceptResult {
    pub request_id: i64,
    pub offer_id: i64,
    pub interest: LoanPackageOfferInterest,
    /// Present once the package has been created
    pub contract: Option<LoanContract>,
    pub cancelled_siblings: u64,
    pub cancelled_other_offers: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageCreatedResult {
    pub interest: LoanPackageOfferInterest,
    pub contract: LoanContract,
}

// =========================================================================
// Cancel / decline
// =========================================================================

/// Admin cancels the lines carrying the given loan products
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCancelCommand {
    pub request_id: i64,
    pub loan_ids: Vec<i64>,
    /// Stamp INVESTOR instead of ADMIN as the reason
    #[serde(default)]
    pub on_behalf_of_investor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResult {
    pub request_id: i64,
    pub cancelled_interest_ids: Vec<i64>,
    pub request_status: RequestStatus,
    pub combined_status: CombinedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclineResult {
    pub offer_id: i64,
    pub request_id: i64,
    pub cancelled: u64,
    pub combined_status: CombinedStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawSymbolResult {
    pub symbol_id: i64,
    pub request_ids: Vec<i64>,
    pub cancelled_interests: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dispatch_errors: Vec<String>,
}

// =========================================================================
// Read side
// =========================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub items: Vec<CombinedLoanRequest>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
