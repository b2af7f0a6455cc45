//! Store module
//!
//! Persistence contract for the lifecycle engine. Every operation runs on a
//! transaction handle (`StoreTx`); nothing is visible to other transactions
//! until `commit`, and dropping a handle rolls it back.
//!
//! Two lock modes exist on purpose: investor-facing accept paths lock with
//! `NoWait` and fail immediately on contention, batch schedulers lock with
//! `SkipLocked` and silently leave contended rows to whoever holds them.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    CancelledReason, Filter, InterestStatus, LoanContract, LoanPackageOffer,
    LoanPackageOfferInterest, LoanPackageRequest, LoanRequestSchedulerConfig, NewLoanContract,
    NewLoanPackageOffer, NewLoanPackageRequest, NewOfferInterest, NewSchedulerJob,
    OfferWithDetails, Page, RequestFilter, RequestStatus, SchedulerJob, SchedulerJobType,
    SubmissionSheet,
};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Row lock behaviour for locking reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Fail with `LockConflict` if any target row is already locked
    NoWait,
    /// Omit rows already locked by another transaction
    SkipLocked,
}

impl LockMode {
    pub fn sql(&self) -> &'static str {
        match self {
            LockMode::NoWait => "FOR UPDATE NOWAIT",
            LockMode::SkipLocked => "FOR UPDATE SKIP LOCKED",
        }
    }
}

/// Source of transactions.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction over every entity store.
#[async_trait]
pub trait StoreTx: RequestStore + OfferStore + ContractStore + SchedulerStore + Send + 'static {
    async fn commit(self) -> StoreResult<()>;
}

// =========================================================================
// RequestStore
// =========================================================================

#[async_trait]
pub trait RequestStore {
    async fn create_request(
        &mut self,
        new: NewLoanPackageRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageRequest>;

    async fn get_request_by_id(&mut self, id: i64) -> StoreResult<LoanPackageRequest>;

    /// Row-lock one request. Under `SkipLocked` a contended row reads as not found.
    async fn lock_request_by_id(
        &mut self,
        id: i64,
        mode: LockMode,
    ) -> StoreResult<LoanPackageRequest>;

    async fn update_request_status_by_id(
        &mut self,
        id: i64,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn update_request_status_by_ids(
        &mut self,
        ids: &[i64],
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Newest first.
    async fn list_requests(
        &mut self,
        filter: &RequestFilter,
        page: Page,
    ) -> StoreResult<Vec<LoanPackageRequest>>;

    async fn count_requests(&mut self, filter: &RequestFilter) -> StoreResult<i64>;

    /// Claim up to `limit` PENDING requests with `loan_rate >= max_rate`,
    /// skipping rows locked elsewhere.
    async fn lock_pending_above_rate(
        &mut self,
        max_rate: Decimal,
        limit: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>>;

    /// Claim every PENDING request on `symbol_id`, skipping rows locked elsewhere.
    async fn lock_pending_by_symbol(
        &mut self,
        symbol_id: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>>;

    async fn delete_request_by_id(&mut self, id: i64) -> StoreResult<()>;
}

// =========================================================================
// OfferStore
// =========================================================================

#[async_trait]
pub trait OfferStore {
    async fn create_offer(
        &mut self,
        new: NewLoanPackageOffer,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageOffer>;

    /// Lines are created PENDING.
    async fn bulk_create_interests(
        &mut self,
        offer: &LoanPackageOffer,
        lines: Vec<NewOfferInterest>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>>;

    async fn find_offer_by_id_with_request(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<(LoanPackageOffer, LoanPackageRequest)>;

    async fn find_offers_by_request_id(
        &mut self,
        request_id: i64,
    ) -> StoreResult<Vec<LoanPackageOffer>>;

    /// Newest offer first, and within each offer the newest line first.
    async fn find_all_offers_for_investor(
        &mut self,
        investor_id: i64,
    ) -> StoreResult<Vec<OfferWithDetails>>;

    async fn find_interest_by_id(&mut self, id: i64) -> StoreResult<LoanPackageOfferInterest>;

    async fn find_interests_by_request_ids(
        &mut self,
        request_ids: &[i64],
    ) -> StoreResult<Vec<LoanPackageOfferInterest>>;

    /// Online offers with `expired_at < now` and at least one PENDING line.
    async fn get_expired_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LoanPackageOffer>>;

    /// Lock every line of one offer with `NoWait`.
    async fn get_interests_by_offer_id_with_lock(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>>;

    /// PENDING lines of one offer -> CANCELLED, stamped in one statement.
    async fn cancel_by_offer_id(
        &mut self,
        offer_id: i64,
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// PENDING lines of the given offers -> CANCELLED/EXPIRED. Empty input is a no-op.
    async fn cancel_expired_offer_interests(
        &mut self,
        offer_ids: &[i64],
        actor: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// The given lines -> CANCELLED, if still PENDING.
    async fn cancel_interests_by_ids(
        &mut self,
        ids: &[i64],
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// PENDING lines across every offer of the given requests -> CANCELLED.
    async fn cancel_pending_by_request_ids(
        &mut self,
        request_ids: &[i64],
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Unconditional status set. Transition rules are checked by the caller.
    async fn update_interest_status(
        &mut self,
        ids: &[i64],
        status: InterestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn attach_contract(
        &mut self,
        interest_id: i64,
        contract_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn create_submission_sheet(
        &mut self,
        request_id: i64,
        submitted_by: &str,
        terms: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SubmissionSheet>;
}

// =========================================================================
// ContractStore
// =========================================================================

#[async_trait]
pub trait ContractStore {
    async fn create_contract(
        &mut self,
        new: NewLoanContract,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanContract>;

    async fn get_contract_by_id(&mut self, id: i64) -> StoreResult<LoanContract>;

    async fn find_contract_by_interest_id(
        &mut self,
        interest_id: i64,
    ) -> StoreResult<Option<LoanContract>>;

    async fn update_guarantee_end(
        &mut self,
        id: i64,
        guarantee_ended_at: DateTime<Utc>,
    ) -> StoreResult<LoanContract>;
}

// =========================================================================
// SchedulerStore
// =========================================================================

#[async_trait]
pub trait SchedulerStore {
    /// Most recent config with `affected_from <= now`.
    async fn get_current_scheduler_config(
        &mut self,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LoanRequestSchedulerConfig>>;

    async fn create_scheduler_config(
        &mut self,
        maximum_loan_rate: Decimal,
        affected_from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanRequestSchedulerConfig>;

    async fn create_scheduler_job(
        &mut self,
        new: NewSchedulerJob,
        now: DateTime<Utc>,
    ) -> StoreResult<SchedulerJob>;

    /// Newest first.
    async fn list_scheduler_jobs(
        &mut self,
        job_type: Filter<SchedulerJobType>,
        limit: i64,
    ) -> StoreResult<Vec<SchedulerJob>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mode_sql() {
        assert_eq!(LockMode::NoWait.sql(), "FOR UPDATE NOWAIT");
        assert_eq!(LockMode::SkipLocked.sql(), "FOR UPDATE SKIP LOCKED");
    }
}
