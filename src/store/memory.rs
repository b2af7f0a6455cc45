//! In-memory Store
//!
//! Transactional store over `BTreeMap`s, used by tests and local runs without
//! a database. Each transaction stages its writes privately and publishes them
//! on `commit`. Request and interest rows carry row locks with the same
//! `NoWait` / `SkipLocked` semantics as the Postgres store; writing a row
//! locked by another transaction fails with `LockConflict` instead of blocking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{
    CancelledReason, Filter, FlowType, InterestStatus, LoanContract, LoanPackageOffer,
    LoanPackageOfferInterest, LoanPackageRequest, LoanRequestSchedulerConfig, NewLoanContract,
    NewLoanPackageOffer, NewLoanPackageRequest, NewOfferInterest, NewSchedulerJob,
    OfferWithDetails, Page, RequestFilter, RequestStatus, SchedulerJob, SchedulerJobType,
    SubmissionSheet,
};

use super::{
    ContractStore, LockMode, OfferStore, RequestStore, SchedulerStore, Store, StoreError,
    StoreResult, StoreTx,
};

type Rows<T> = BTreeMap<i64, T>;
type Staged<T> = BTreeMap<i64, Option<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Request(i64),
    Interest(i64),
}

#[derive(Debug, Default)]
struct Tables {
    requests: Rows<LoanPackageRequest>,
    offers: Rows<LoanPackageOffer>,
    interests: Rows<LoanPackageOfferInterest>,
    contracts: Rows<LoanContract>,
    sheets: Rows<SubmissionSheet>,
    configs: Rows<LoanRequestSchedulerConfig>,
    jobs: Rows<SchedulerJob>,
}

/// Writes a transaction has made but not yet published. `None` is a delete.
#[derive(Debug, Default)]
struct Pending {
    requests: Staged<LoanPackageRequest>,
    offers: Staged<LoanPackageOffer>,
    interests: Staged<LoanPackageOfferInterest>,
    contracts: Staged<LoanContract>,
    sheets: Staged<SubmissionSheet>,
    configs: Staged<LoanRequestSchedulerConfig>,
    jobs: Staged<SchedulerJob>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    locks: HashMap<RowKey, u64>,
    next_id: i64,
    next_tx: u64,
}

impl MemoryState {
    /// Ids are never reused, even when the allocating transaction rolls back.
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn merged<T: Clone>(base: &Rows<T>, staged: &Staged<T>) -> Rows<T> {
    let mut rows = base.clone();
    for (id, row) in staged {
        match row {
            Some(row) => {
                rows.insert(*id, row.clone());
            }
            None => {
                rows.remove(id);
            }
        }
    }
    rows
}

fn publish<T>(base: &mut Rows<T>, staged: Staged<T>) {
    for (id, row) in staged {
        match row {
            Some(row) => {
                base.insert(id, row);
            }
            None => {
                base.remove(&id);
            }
        }
    }
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, i64)) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn request_matches(filter: &RequestFilter, r: &LoanPackageRequest) -> bool {
    filter.symbol_id.accepts(|v| r.symbol_id == *v)
        && filter.investor_id.accepts(|v| r.investor_id == *v)
        && filter.account_no.accepts(|v| &r.account_no == v)
        && filter.status.accepts(|v| r.status == *v)
        && filter.request_type.accepts(|v| r.request_type == *v)
        && filter.asset_type.accepts(|v| r.asset_type == *v)
        && filter.loan_rate_from.accepts(|v| r.loan_rate >= *v)
        && filter.loan_rate_to.accepts(|v| r.loan_rate <= *v)
        && filter.created_from.accepts(|v| r.created_at >= *v)
        && filter.created_to.accepts(|v| r.created_at <= *v)
}

/// Shared in-memory store. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        let id = {
            let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            state.next_tx += 1;
            state.next_tx
        };
        Ok(MemoryTx {
            id,
            shared: self.inner.clone(),
            pending: Pending::default(),
        })
    }
}

/// Open in-memory transaction. Dropping it releases its locks and discards
/// its staged writes.
#[derive(Debug)]
pub struct MemoryTx {
    id: u64,
    shared: Arc<Mutex<MemoryState>>,
    pending: Pending,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        let mut state = self.state();
        let id = self.id;
        state.locks.retain(|_, holder| *holder != id);
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(mut self) -> StoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.state();
        let tables = &mut state.tables;
        publish(&mut tables.requests, pending.requests);
        publish(&mut tables.offers, pending.offers);
        publish(&mut tables.interests, pending.interests);
        publish(&mut tables.contracts, pending.contracts);
        publish(&mut tables.sheets, pending.sheets);
        publish(&mut tables.configs, pending.configs);
        publish(&mut tables.jobs, pending.jobs);
        // locks are released by Drop
        Ok(())
    }
}

impl MemoryTx {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alloc_id(&self) -> i64 {
        self.state().alloc_id()
    }

    /// Lock every key or none of them. Returns the first contended key.
    fn try_lock(&self, keys: &[RowKey]) -> Result<(), RowKey> {
        let mut state = self.state();
        if let Some(busy) = keys
            .iter()
            .find(|key| matches!(state.locks.get(*key), Some(holder) if *holder != self.id))
        {
            return Err(*busy);
        }
        for key in keys {
            state.locks.insert(*key, self.id);
        }
        Ok(())
    }

    fn requests(&self) -> Rows<LoanPackageRequest> {
        merged(&self.state().tables.requests, &self.pending.requests)
    }

    fn offers(&self) -> Rows<LoanPackageOffer> {
        merged(&self.state().tables.offers, &self.pending.offers)
    }

    fn interests(&self) -> Rows<LoanPackageOfferInterest> {
        merged(&self.state().tables.interests, &self.pending.interests)
    }

    fn contracts(&self) -> Rows<LoanContract> {
        merged(&self.state().tables.contracts, &self.pending.contracts)
    }

    fn request(&self, id: i64) -> StoreResult<LoanPackageRequest> {
        self.requests()
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("request", id))
    }

    fn write_request(&mut self, row: LoanPackageRequest) -> StoreResult<()> {
        self.try_lock(&[RowKey::Request(row.id)])
            .map_err(|_| StoreError::lock_conflict("request", row.id))?;
        self.pending.requests.insert(row.id, Some(row));
        Ok(())
    }

    fn write_interest(&mut self, row: LoanPackageOfferInterest) -> StoreResult<()> {
        self.try_lock(&[RowKey::Interest(row.id)])
            .map_err(|_| StoreError::lock_conflict("offer interest", row.id))?;
        self.pending.interests.insert(row.id, Some(row));
        Ok(())
    }

    /// Cancel every PENDING line selected by `select`.
    fn cancel_pending_where(
        &mut self,
        select: impl Fn(&LoanPackageOfferInterest) -> bool,
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let targets: Vec<LoanPackageOfferInterest> = self
            .interests()
            .into_values()
            .filter(|i| i.status == InterestStatus::Pending && select(i))
            .collect();

        let count = targets.len() as u64;
        for mut line in targets {
            line.status = InterestStatus::Cancelled;
            line.cancelled_reason = reason;
            line.cancelled_by = Some(actor.to_string());
            line.cancelled_at = Some(now);
            line.updated_at = now;
            self.write_interest(line)?;
        }
        Ok(count)
    }
}

// =========================================================================
// RequestStore
// =========================================================================

#[async_trait]
impl RequestStore for MemoryTx {
    async fn create_request(
        &mut self,
        new: NewLoanPackageRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageRequest> {
        let request = new.into_request(self.alloc_id(), now);
        self.write_request(request.clone())?;
        Ok(request)
    }

    async fn get_request_by_id(&mut self, id: i64) -> StoreResult<LoanPackageRequest> {
        self.request(id)
    }

    async fn lock_request_by_id(
        &mut self,
        id: i64,
        mode: LockMode,
    ) -> StoreResult<LoanPackageRequest> {
        let request = self.request(id)?;
        match (self.try_lock(&[RowKey::Request(id)]), mode) {
            (Ok(()), _) => Ok(request),
            (Err(_), LockMode::NoWait) => Err(StoreError::lock_conflict("request", id)),
            (Err(_), LockMode::SkipLocked) => Err(StoreError::not_found("request", id)),
        }
    }

    async fn update_request_status_by_id(
        &mut self,
        id: i64,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut request = self.request(id)?;
        request.status = status;
        request.updated_at = now;
        self.write_request(request)
    }

    async fn update_request_status_by_ids(
        &mut self,
        ids: &[i64],
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut requests = self.requests();
        let mut count = 0;
        for id in ids {
            if let Some(mut request) = requests.remove(id) {
                request.status = status;
                request.updated_at = now;
                self.write_request(request)?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_requests(
        &mut self,
        filter: &RequestFilter,
        page: Page,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let mut rows: Vec<LoanPackageRequest> = self
            .requests()
            .into_values()
            .filter(|r| request_matches(filter, r))
            .collect();
        newest_first(&mut rows, |r| (r.created_at, r.id));

        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn count_requests(&mut self, filter: &RequestFilter) -> StoreResult<i64> {
        let count = self
            .requests()
            .values()
            .filter(|r| request_matches(filter, r))
            .count();
        Ok(count as i64)
    }

    async fn lock_pending_above_rate(
        &mut self,
        max_rate: Decimal,
        limit: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let mut claimed = Vec::new();
        for request in self.requests().into_values() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if request.is_pending()
                && request.loan_rate >= max_rate
                && self.try_lock(&[RowKey::Request(request.id)]).is_ok()
            {
                claimed.push(request);
            }
        }
        Ok(claimed)
    }

    async fn lock_pending_by_symbol(
        &mut self,
        symbol_id: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let mut claimed = Vec::new();
        for request in self.requests().into_values() {
            if request.is_pending()
                && request.symbol_id == symbol_id
                && self.try_lock(&[RowKey::Request(request.id)]).is_ok()
            {
                claimed.push(request);
            }
        }
        Ok(claimed)
    }

    async fn delete_request_by_id(&mut self, id: i64) -> StoreResult<()> {
        self.request(id)?;
        self.try_lock(&[RowKey::Request(id)])
            .map_err(|_| StoreError::lock_conflict("request", id))?;

        let lines: Vec<i64> = self
            .interests()
            .values()
            .filter(|i| i.request_id == id)
            .map(|i| i.id)
            .collect();
        let keys: Vec<RowKey> = lines.iter().map(|id| RowKey::Interest(*id)).collect();
        self.try_lock(&keys)
            .map_err(|_| StoreError::lock_conflict("request", id))?;

        for line in lines {
            self.pending.interests.insert(line, None);
        }
        for offer in self.offers().values().filter(|o| o.request_id == id) {
            self.pending.offers.insert(offer.id, None);
        }
        let sheets = merged(&self.state().tables.sheets, &self.pending.sheets);
        for sheet in sheets.values().filter(|s| s.request_id == id) {
            self.pending.sheets.insert(sheet.id, None);
        }
        self.pending.requests.insert(id, None);
        Ok(())
    }
}

// =========================================================================
// OfferStore
// =========================================================================

#[async_trait]
impl OfferStore for MemoryTx {
    async fn create_offer(
        &mut self,
        new: NewLoanPackageOffer,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageOffer> {
        self.request(new.request_id)?;

        let offer = LoanPackageOffer {
            id: self.alloc_id(),
            request_id: new.request_id,
            offered_by: new.offered_by,
            flow_type: new.flow_type,
            expired_at: new.expired_at,
            created_at: now,
        };
        self.pending.offers.insert(offer.id, Some(offer.clone()));
        Ok(offer)
    }

    async fn bulk_create_interests(
        &mut self,
        offer: &LoanPackageOffer,
        lines: Vec<NewOfferInterest>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        let mut created = Vec::with_capacity(lines.len());
        for line in lines {
            let interest = line.into_interest(self.alloc_id(), offer.id, offer.request_id, now);
            self.write_interest(interest.clone())?;
            created.push(interest);
        }
        Ok(created)
    }

    async fn find_offer_by_id_with_request(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<(LoanPackageOffer, LoanPackageRequest)> {
        let offer = self
            .offers()
            .remove(&offer_id)
            .ok_or_else(|| StoreError::not_found("offer", offer_id))?;
        let request = self.request(offer.request_id)?;
        Ok((offer, request))
    }

    async fn find_offers_by_request_id(
        &mut self,
        request_id: i64,
    ) -> StoreResult<Vec<LoanPackageOffer>> {
        let mut offers: Vec<LoanPackageOffer> = self
            .offers()
            .into_values()
            .filter(|o| o.request_id == request_id)
            .collect();
        newest_first(&mut offers, |o| (o.created_at, o.id));
        Ok(offers)
    }

    async fn find_all_offers_for_investor(
        &mut self,
        investor_id: i64,
    ) -> StoreResult<Vec<OfferWithDetails>> {
        let requests = self.requests();
        let interests = self.interests();

        let mut offers: Vec<OfferWithDetails> = self
            .offers()
            .into_values()
            .filter_map(|offer| {
                let request = requests
                    .get(&offer.request_id)
                    .filter(|r| r.investor_id == investor_id)?
                    .clone();
                let mut lines: Vec<LoanPackageOfferInterest> = interests
                    .values()
                    .filter(|i| i.offer_id == offer.id)
                    .cloned()
                    .collect();
                newest_first(&mut lines, |i| (i.created_at, i.id));
                Some(OfferWithDetails {
                    offer,
                    request,
                    interests: lines,
                })
            })
            .collect();
        newest_first(&mut offers, |o| (o.offer.created_at, o.offer.id));
        Ok(offers)
    }

    async fn find_interest_by_id(&mut self, id: i64) -> StoreResult<LoanPackageOfferInterest> {
        self.interests()
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("offer interest", id))
    }

    async fn find_interests_by_request_ids(
        &mut self,
        request_ids: &[i64],
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        let mut lines: Vec<LoanPackageOfferInterest> = self
            .interests()
            .into_values()
            .filter(|i| request_ids.contains(&i.request_id))
            .collect();
        newest_first(&mut lines, |i| (i.created_at, i.id));
        Ok(lines)
    }

    async fn get_expired_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LoanPackageOffer>> {
        let interests = self.interests();
        Ok(self
            .offers()
            .into_values()
            .filter(|o| o.flow_type == FlowType::Online && o.is_expired_at(now))
            .filter(|o| {
                interests
                    .values()
                    .any(|i| i.offer_id == o.id && i.status == InterestStatus::Pending)
            })
            .collect())
    }

    async fn get_interests_by_offer_id_with_lock(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        let lines: Vec<LoanPackageOfferInterest> = self
            .interests()
            .into_values()
            .filter(|i| i.offer_id == offer_id)
            .collect();
        if lines.is_empty() {
            return Err(StoreError::not_found("offer", offer_id));
        }

        let keys: Vec<RowKey> = lines.iter().map(|i| RowKey::Interest(i.id)).collect();
        self.try_lock(&keys)
            .map_err(|_| StoreError::lock_conflict("offer", offer_id))?;
        Ok(lines)
    }

    async fn cancel_by_offer_id(
        &mut self,
        offer_id: i64,
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.cancel_pending_where(|i| i.offer_id == offer_id, actor, reason, now)
    }

    async fn cancel_expired_offer_interests(
        &mut self,
        offer_ids: &[i64],
        actor: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if offer_ids.is_empty() {
            return Ok(0);
        }
        self.cancel_pending_where(
            |i| offer_ids.contains(&i.offer_id),
            actor,
            CancelledReason::Expired,
            now,
        )
    }

    async fn cancel_interests_by_ids(
        &mut self,
        ids: &[i64],
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.cancel_pending_where(|i| ids.contains(&i.id), actor, reason, now)
    }

    async fn cancel_pending_by_request_ids(
        &mut self,
        request_ids: &[i64],
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if request_ids.is_empty() {
            return Ok(0);
        }
        self.cancel_pending_where(|i| request_ids.contains(&i.request_id), actor, reason, now)
    }

    async fn update_interest_status(
        &mut self,
        ids: &[i64],
        status: InterestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut interests = self.interests();
        let mut count = 0;
        for id in ids {
            if let Some(mut line) = interests.remove(id) {
                line.status = status;
                line.updated_at = now;
                self.write_interest(line)?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn attach_contract(
        &mut self,
        interest_id: i64,
        contract_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut line = self
            .interests()
            .remove(&interest_id)
            .ok_or_else(|| StoreError::not_found("offer interest", interest_id))?;
        line.contract_id = Some(contract_id);
        line.updated_at = now;
        self.write_interest(line)
    }

    async fn create_submission_sheet(
        &mut self,
        request_id: i64,
        submitted_by: &str,
        terms: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SubmissionSheet> {
        self.request(request_id)?;

        let sheet = SubmissionSheet {
            id: self.alloc_id(),
            request_id,
            submitted_by: submitted_by.to_string(),
            terms,
            created_at: now,
        };
        self.pending.sheets.insert(sheet.id, Some(sheet.clone()));
        Ok(sheet)
    }
}

// =========================================================================
// ContractStore
// =========================================================================

#[async_trait]
impl ContractStore for MemoryTx {
    async fn create_contract(
        &mut self,
        new: NewLoanContract,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanContract> {
        if self.contracts().values().any(|c| c.interest_id == new.interest_id) {
            return Err(StoreError::duplicate("contract for interest", new.interest_id));
        }

        let contract = LoanContract {
            id: self.alloc_id(),
            request_id: new.request_id,
            interest_id: new.interest_id,
            investor_id: new.investor_id,
            account_no: new.account_no,
            symbol_id: new.symbol_id,
            loan_id: new.loan_id,
            guarantee_ended_at: None,
            created_at: now,
        };
        self.pending.contracts.insert(contract.id, Some(contract.clone()));
        Ok(contract)
    }

    async fn get_contract_by_id(&mut self, id: i64) -> StoreResult<LoanContract> {
        self.contracts()
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("contract", id))
    }

    async fn find_contract_by_interest_id(
        &mut self,
        interest_id: i64,
    ) -> StoreResult<Option<LoanContract>> {
        Ok(self
            .contracts()
            .into_values()
            .find(|c| c.interest_id == interest_id))
    }

    async fn update_guarantee_end(
        &mut self,
        id: i64,
        guarantee_ended_at: DateTime<Utc>,
    ) -> StoreResult<LoanContract> {
        let mut contract = self
            .contracts()
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("contract", id))?;
        contract.guarantee_ended_at = Some(guarantee_ended_at);
        self.pending.contracts.insert(id, Some(contract.clone()));
        Ok(contract)
    }
}

// =========================================================================
// SchedulerStore
// =========================================================================

#[async_trait]
impl SchedulerStore for MemoryTx {
    async fn get_current_scheduler_config(
        &mut self,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LoanRequestSchedulerConfig>> {
        let configs = merged(&self.state().tables.configs, &self.pending.configs);
        Ok(configs
            .into_values()
            .filter(|c| c.affected_from <= now)
            .max_by_key(|c| (c.affected_from, c.id)))
    }

    async fn create_scheduler_config(
        &mut self,
        maximum_loan_rate: Decimal,
        affected_from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanRequestSchedulerConfig> {
        let config = LoanRequestSchedulerConfig {
            id: self.alloc_id(),
            maximum_loan_rate,
            affected_from,
            created_at: now,
        };
        self.pending.configs.insert(config.id, Some(config.clone()));
        Ok(config)
    }

    async fn create_scheduler_job(
        &mut self,
        new: NewSchedulerJob,
        now: DateTime<Utc>,
    ) -> StoreResult<SchedulerJob> {
        let job = SchedulerJob {
            id: self.alloc_id(),
            job_type: new.job_type,
            status: new.status,
            triggered_by: new.triggered_by,
            tracking_data: new.tracking_data,
            created_at: now,
        };
        self.pending.jobs.insert(job.id, Some(job.clone()));
        Ok(job)
    }

    async fn list_scheduler_jobs(
        &mut self,
        job_type: Filter<SchedulerJobType>,
        limit: i64,
    ) -> StoreResult<Vec<SchedulerJob>> {
        let jobs = merged(&self.state().tables.jobs, &self.pending.jobs);
        let mut jobs: Vec<SchedulerJob> = jobs
            .into_values()
            .filter(|j| job_type.accepts(|t| j.job_type == *t))
            .collect();
        newest_first(&mut jobs, |j| (j.created_at, j.id));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RequestTerms, RequestType};
    use rust_decimal_macros::dec;

    fn new_request(symbol_id: i64, loan_rate: Decimal) -> NewLoanPackageRequest {
        NewLoanPackageRequest {
            symbol_id,
            investor_id: 10,
            account_no: "0001".to_string(),
            request_type: RequestType::Flexible,
            terms: RequestTerms::Underlying {
                loan_rate,
                limit_amount: dec!(1000),
            },
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let store = MemoryStore::new();
        let mut writer = store.begin().await.unwrap();
        let request = writer
            .create_request(new_request(1, dec!(0.5)), Utc::now())
            .await
            .unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.get_request_by_id(request.id).await.unwrap_err().is_not_found());
        assert_eq!(writer.get_request_by_id(request.id).await.unwrap(), request);

        writer.commit().await.unwrap();
        assert_eq!(reader.get_request_by_id(request.id).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = MemoryStore::new();
        let id = {
            let mut tx = store.begin().await.unwrap();
            tx.create_request(new_request(1, dec!(0.5)), Utc::now())
                .await
                .unwrap()
                .id
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_request_by_id(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_no_wait_conflict_and_release() {
        let store = MemoryStore::new();
        let mut setup = store.begin().await.unwrap();
        let request = setup
            .create_request(new_request(1, dec!(0.5)), Utc::now())
            .await
            .unwrap();
        setup.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_request_by_id(request.id, LockMode::NoWait).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .lock_request_by_id(request.id, LockMode::NoWait)
            .await
            .unwrap_err();
        assert!(err.is_lock_conflict());

        let err = second
            .lock_request_by_id(request.id, LockMode::SkipLocked)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        drop(first);
        assert!(second
            .lock_request_by_id(request.id, LockMode::NoWait)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_skip_locked_batch_leaves_contended_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut setup = store.begin().await.unwrap();
        let a = setup.create_request(new_request(1, dec!(0.5)), now).await.unwrap();
        let b = setup.create_request(new_request(1, dec!(0.6)), now).await.unwrap();
        setup.create_request(new_request(1, dec!(0.1)), now).await.unwrap();
        setup.commit().await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_request_by_id(a.id, LockMode::NoWait).await.unwrap();

        let mut batch = store.begin().await.unwrap();
        let claimed = batch.lock_pending_above_rate(dec!(0.4), 10).await.unwrap();
        assert_eq!(claimed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);
    }

    #[tokio::test]
    async fn test_one_contract_per_interest() {
        let store = MemoryStore::new();
        let contract = NewLoanContract {
            request_id: 1,
            interest_id: 7,
            investor_id: 10,
            account_no: "0001".to_string(),
            symbol_id: 1,
            loan_id: 77,
        };

        let mut tx = store.begin().await.unwrap();
        tx.create_contract(contract.clone(), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.create_contract(contract, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id: 7, .. }));
    }

    #[test]
    fn test_list_newest_first_with_paging() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let base = Utc::now();
            let mut tx = store.begin().await.unwrap();
            for minutes in 0..5 {
                tx.create_request(
                    new_request(minutes, dec!(0.2)),
                    base + chrono::Duration::minutes(minutes),
                )
                .await
                .unwrap();
            }

            let filter = RequestFilter::default();
            let page = tx.list_requests(&filter, Page::new(2, 1)).await.unwrap();
            assert_eq!(
                page.iter().map(|r| r.symbol_id).collect::<Vec<_>>(),
                vec![3, 2]
            );
            assert_eq!(tx.count_requests(&filter).await.unwrap(), 5);

            let only_symbol = RequestFilter {
                symbol_id: Filter::Present(4),
                ..Default::default()
            };
            assert_eq!(tx.count_requests(&only_symbol).await.unwrap(), 1);
        });
    }
}
