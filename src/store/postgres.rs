//! PostgreSQL Store
//!
//! sqlx implementation of the persistence contract. Statuses are stored as
//! upper-snake text and parsed back through the closed enum parsers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::{
    CancelledReason, DomainError, Filter, FlowType, InterestStatus, LoanContract,
    LoanPackageOffer, LoanPackageOfferInterest, LoanPackageRequest, LoanRequestSchedulerConfig,
    NewLoanContract, NewLoanPackageOffer, NewLoanPackageRequest, NewOfferInterest,
    NewSchedulerJob, OfferWithDetails, Page, RequestFilter, RequestStatus, SchedulerJob,
    SchedulerJobType, SubmissionSheet,
};

use super::{
    ContractStore, LockMode, OfferStore, RequestStore, SchedulerStore, Store, StoreError,
    StoreResult, StoreTx,
};

const REQUEST_COLUMNS: &str = "id, symbol_id, investor_id, account_no, loan_rate, limit_amount, \
     request_type, asset_type, initial_rate, contract_size, status, created_at, updated_at";

const OFFER_COLUMNS: &str = "id, request_id, offered_by, flow_type, expired_at, created_at";

const INTEREST_COLUMNS: &str = "id, offer_id, request_id, loan_id, score_group_id, limit_amount, \
     loan_rate, interest_rate, term_days, status, cancelled_reason, cancelled_by, cancelled_at, \
     contract_id, created_at, updated_at";

const CONTRACT_COLUMNS: &str = "id, request_id, interest_id, investor_id, account_no, symbol_id, \
     loan_id, guarantee_ended_at, created_at";

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> StoreResult<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

/// Open Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// =========================================================================
// Row types
// =========================================================================

fn parse<T>(table: &'static str, text: &str) -> StoreResult<T>
where
    T: FromStr<Err = DomainError>,
{
    text.parse()
        .map_err(|source| StoreError::Decode { table, source })
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: i64,
    symbol_id: i64,
    investor_id: i64,
    account_no: String,
    loan_rate: Decimal,
    limit_amount: Decimal,
    request_type: String,
    asset_type: String,
    initial_rate: Option<Decimal>,
    contract_size: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for LoanPackageRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> StoreResult<Self> {
        const TABLE: &str = "loan_package_requests";
        Ok(Self {
            id: row.id,
            symbol_id: row.symbol_id,
            investor_id: row.investor_id,
            account_no: row.account_no,
            loan_rate: row.loan_rate,
            limit_amount: row.limit_amount,
            request_type: parse(TABLE, &row.request_type)?,
            asset_type: parse(TABLE, &row.asset_type)?,
            initial_rate: row.initial_rate,
            contract_size: row.contract_size,
            status: parse(TABLE, &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OfferRow {
    id: i64,
    request_id: i64,
    offered_by: String,
    flow_type: Option<String>,
    expired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for LoanPackageOffer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> StoreResult<Self> {
        let flow_type = match row.flow_type.as_deref() {
            Some(text) => parse("loan_package_offers", text)?,
            None => FlowType::Unspecified,
        };
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            offered_by: row.offered_by,
            flow_type,
            expired_at: row.expired_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct InterestRow {
    id: i64,
    offer_id: i64,
    request_id: i64,
    loan_id: i64,
    score_group_id: Option<i64>,
    limit_amount: Decimal,
    loan_rate: Decimal,
    interest_rate: Decimal,
    term_days: i32,
    status: String,
    cancelled_reason: String,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    contract_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InterestRow> for LoanPackageOfferInterest {
    type Error = StoreError;

    fn try_from(row: InterestRow) -> StoreResult<Self> {
        const TABLE: &str = "loan_package_offer_interests";
        Ok(Self {
            id: row.id,
            offer_id: row.offer_id,
            request_id: row.request_id,
            loan_id: row.loan_id,
            score_group_id: row.score_group_id,
            limit_amount: row.limit_amount,
            loan_rate: row.loan_rate,
            interest_rate: row.interest_rate,
            term_days: row.term_days,
            status: parse(TABLE, &row.status)?,
            cancelled_reason: parse(TABLE, &row.cancelled_reason)?,
            cancelled_by: row.cancelled_by,
            cancelled_at: row.cancelled_at,
            contract_id: row.contract_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ContractRow {
    id: i64,
    request_id: i64,
    interest_id: i64,
    investor_id: i64,
    account_no: String,
    symbol_id: i64,
    loan_id: i64,
    guarantee_ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ContractRow> for LoanContract {
    fn from(row: ContractRow) -> Self {
        Self {
            id: row.id,
            request_id: row.request_id,
            interest_id: row.interest_id,
            investor_id: row.investor_id,
            account_no: row.account_no,
            symbol_id: row.symbol_id,
            loan_id: row.loan_id,
            guarantee_ended_at: row.guarantee_ended_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    job_type: String,
    status: String,
    triggered_by: String,
    tracking_data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for SchedulerJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        const TABLE: &str = "scheduler_jobs";
        Ok(Self {
            id: row.id,
            job_type: parse(TABLE, &row.job_type)?,
            status: parse(TABLE, &row.status)?,
            triggered_by: row.triggered_by,
            tracking_data: row.tracking_data,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn push_request_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RequestFilter) {
    if let Filter::Present(v) = &filter.symbol_id {
        qb.push(" AND symbol_id = ").push_bind(*v);
    }
    if let Filter::Present(v) = &filter.investor_id {
        qb.push(" AND investor_id = ").push_bind(*v);
    }
    if let Filter::Present(v) = &filter.account_no {
        qb.push(" AND account_no = ").push_bind(v.clone());
    }
    if let Filter::Present(v) = &filter.status {
        qb.push(" AND status = ").push_bind(v.as_str());
    }
    if let Filter::Present(v) = &filter.request_type {
        qb.push(" AND request_type = ").push_bind(v.as_str());
    }
    if let Filter::Present(v) = &filter.asset_type {
        qb.push(" AND asset_type = ").push_bind(v.as_str());
    }
    if let Filter::Present(v) = &filter.loan_rate_from {
        qb.push(" AND loan_rate >= ").push_bind(*v);
    }
    if let Filter::Present(v) = &filter.loan_rate_to {
        qb.push(" AND loan_rate <= ").push_bind(*v);
    }
    if let Filter::Present(v) = &filter.created_from {
        qb.push(" AND created_at >= ").push_bind(*v);
    }
    if let Filter::Present(v) = &filter.created_to {
        qb.push(" AND created_at <= ").push_bind(*v);
    }
}

// =========================================================================
// RequestStore
// =========================================================================

#[async_trait]
impl RequestStore for PgTx {
    async fn create_request(
        &mut self,
        new: NewLoanPackageRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageRequest> {
        let draft = new.into_request(0, now);

        let row: RequestRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO loan_package_requests (
                symbol_id, investor_id, account_no, loan_rate, limit_amount,
                request_type, asset_type, initial_rate, contract_size,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(draft.symbol_id)
        .bind(draft.investor_id)
        .bind(&draft.account_no)
        .bind(draft.loan_rate)
        .bind(draft.limit_amount)
        .bind(draft.request_type.as_str())
        .bind(draft.asset_type.as_str())
        .bind(draft.initial_rate)
        .bind(draft.contract_size)
        .bind(draft.status.as_str())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn get_request_by_id(&mut self, id: i64) -> StoreResult<LoanPackageRequest> {
        let row: RequestRow = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM loan_package_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "request", id))?;

        row.try_into()
    }

    async fn lock_request_by_id(
        &mut self,
        id: i64,
        mode: LockMode,
    ) -> StoreResult<LoanPackageRequest> {
        let row: RequestRow = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM loan_package_requests WHERE id = $1 {}",
            mode.sql()
        ))
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "request", id))?;

        row.try_into()
    }

    async fn update_request_status_by_id(
        &mut self,
        id: i64,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let rows = sqlx::query(
            "UPDATE loan_package_requests SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "request", id))?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::not_found("request", id));
        }
        Ok(())
    }

    async fn update_request_status_by_ids(
        &mut self,
        ids: &[i64],
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE loan_package_requests SET status = $2, updated_at = $3 WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_requests(
        &mut self,
        filter: &RequestFilter,
        page: Page,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM loan_package_requests WHERE TRUE"
        ));
        push_request_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows: Vec<RequestRow> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        convert_all(rows)
    }

    async fn count_requests(&mut self, filter: &RequestFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM loan_package_requests WHERE TRUE");
        push_request_filter(&mut qb, filter);

        let count: i64 = qb.build_query_scalar().fetch_one(&mut *self.tx).await?;
        Ok(count)
    }

    async fn lock_pending_above_rate(
        &mut self,
        max_rate: Decimal,
        limit: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM loan_package_requests
            WHERE status = 'PENDING' AND loan_rate >= $1
            ORDER BY id
            LIMIT $2
            {}
            "#,
            LockMode::SkipLocked.sql()
        ))
        .bind(max_rate)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn lock_pending_by_symbol(
        &mut self,
        symbol_id: i64,
    ) -> StoreResult<Vec<LoanPackageRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM loan_package_requests
            WHERE status = 'PENDING' AND symbol_id = $1
            ORDER BY id
            {}
            "#,
            LockMode::SkipLocked.sql()
        ))
        .bind(symbol_id)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn delete_request_by_id(&mut self, id: i64) -> StoreResult<()> {
        let rows = sqlx::query("DELETE FROM loan_package_requests WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::from_sqlx(e, "request", id))?
            .rows_affected();

        if rows == 0 {
            return Err(StoreError::not_found("request", id));
        }
        Ok(())
    }
}

// =========================================================================
// OfferStore
// =========================================================================

#[async_trait]
impl OfferStore for PgTx {
    async fn create_offer(
        &mut self,
        new: NewLoanPackageOffer,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanPackageOffer> {
        let row: OfferRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO loan_package_offers (request_id, offered_by, flow_type, expired_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(new.request_id)
        .bind(&new.offered_by)
        .bind(match new.flow_type {
            FlowType::Unspecified => None,
            flow => Some(flow.as_str()),
        })
        .bind(new.expired_at)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "request", new.request_id))?;

        row.try_into()
    }

    async fn bulk_create_interests(
        &mut self,
        offer: &LoanPackageOffer,
        lines: Vec<NewOfferInterest>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(
            "INSERT INTO loan_package_offer_interests (offer_id, request_id, loan_id, \
             score_group_id, limit_amount, loan_rate, interest_rate, term_days, status, \
             cancelled_reason, created_at, updated_at) ",
        );
        qb.push_values(lines, |mut b, line| {
            b.push_bind(offer.id)
                .push_bind(offer.request_id)
                .push_bind(line.loan_id)
                .push_bind(line.score_group_id)
                .push_bind(line.limit_amount)
                .push_bind(line.loan_rate)
                .push_bind(line.interest_rate)
                .push_bind(line.term_days)
                .push_bind(InterestStatus::Pending.as_str())
                .push_bind(CancelledReason::Unknown.as_str())
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(format!(" RETURNING {INTEREST_COLUMNS}"));

        let mut rows: Vec<InterestRow> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        rows.sort_by_key(|r| r.id);
        convert_all(rows)
    }

    async fn find_offer_by_id_with_request(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<(LoanPackageOffer, LoanPackageRequest)> {
        let offer: OfferRow = sqlx::query_as(&format!(
            "SELECT {OFFER_COLUMNS} FROM loan_package_offers WHERE id = $1"
        ))
        .bind(offer_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "offer", offer_id))?;

        let offer: LoanPackageOffer = offer.try_into()?;
        let request = self.get_request_by_id(offer.request_id).await?;
        Ok((offer, request))
    }

    async fn find_offers_by_request_id(
        &mut self,
        request_id: i64,
    ) -> StoreResult<Vec<LoanPackageOffer>> {
        let rows: Vec<OfferRow> = sqlx::query_as(&format!(
            "SELECT {OFFER_COLUMNS} FROM loan_package_offers WHERE request_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(request_id)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn find_all_offers_for_investor(
        &mut self,
        investor_id: i64,
    ) -> StoreResult<Vec<OfferWithDetails>> {
        let offers: Vec<OfferRow> = sqlx::query_as(
            r#"
            SELECT o.id, o.request_id, o.offered_by, o.flow_type, o.expired_at, o.created_at
            FROM loan_package_offers o
            JOIN loan_package_requests r ON r.id = o.request_id
            WHERE r.investor_id = $1
            ORDER BY o.created_at DESC, o.id DESC
            "#,
        )
        .bind(investor_id)
        .fetch_all(&mut *self.tx)
        .await?;
        let offers: Vec<LoanPackageOffer> = convert_all(offers)?;

        if offers.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM loan_package_requests WHERE investor_id = $1"
        ))
        .bind(investor_id)
        .fetch_all(&mut *self.tx)
        .await?;
        let requests: HashMap<i64, LoanPackageRequest> = convert_all(requests)?
            .into_iter()
            .map(|r: LoanPackageRequest| (r.id, r))
            .collect();

        let offer_ids: Vec<i64> = offers.iter().map(|o| o.id).collect();
        let interests: Vec<InterestRow> = sqlx::query_as(&format!(
            "SELECT {INTEREST_COLUMNS} FROM loan_package_offer_interests \
             WHERE offer_id = ANY($1) ORDER BY created_at DESC, id DESC"
        ))
        .bind(&offer_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut by_offer: HashMap<i64, Vec<LoanPackageOfferInterest>> = HashMap::new();
        for line in convert_all::<_, LoanPackageOfferInterest>(interests)? {
            by_offer.entry(line.offer_id).or_default().push(line);
        }

        offers
            .into_iter()
            .map(|offer| {
                let request = requests
                    .get(&offer.request_id)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found("request", offer.request_id))?;
                let interests = by_offer.remove(&offer.id).unwrap_or_default();
                Ok(OfferWithDetails {
                    offer,
                    request,
                    interests,
                })
            })
            .collect()
    }

    async fn find_interest_by_id(&mut self, id: i64) -> StoreResult<LoanPackageOfferInterest> {
        let row: InterestRow = sqlx::query_as(&format!(
            "SELECT {INTEREST_COLUMNS} FROM loan_package_offer_interests WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "offer interest", id))?;

        row.try_into()
    }

    async fn find_interests_by_request_ids(
        &mut self,
        request_ids: &[i64],
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        if request_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<InterestRow> = sqlx::query_as(&format!(
            "SELECT {INTEREST_COLUMNS} FROM loan_package_offer_interests \
             WHERE request_id = ANY($1) ORDER BY created_at DESC, id DESC"
        ))
        .bind(request_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn get_expired_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LoanPackageOffer>> {
        let rows: Vec<OfferRow> = sqlx::query_as(
            r#"
            SELECT o.id, o.request_id, o.offered_by, o.flow_type, o.expired_at, o.created_at
            FROM loan_package_offers o
            WHERE o.flow_type = 'ONLINE'
              AND o.expired_at < $1
              AND EXISTS (
                  SELECT 1 FROM loan_package_offer_interests i
                  WHERE i.offer_id = o.id AND i.status = 'PENDING'
              )
            ORDER BY o.id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn get_interests_by_offer_id_with_lock(
        &mut self,
        offer_id: i64,
    ) -> StoreResult<Vec<LoanPackageOfferInterest>> {
        let rows: Vec<InterestRow> = sqlx::query_as(&format!(
            "SELECT {INTEREST_COLUMNS} FROM loan_package_offer_interests \
             WHERE offer_id = $1 ORDER BY id {}",
            LockMode::NoWait.sql()
        ))
        .bind(offer_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "offer", offer_id))?;

        if rows.is_empty() {
            return Err(StoreError::not_found("offer", offer_id));
        }
        convert_all(rows)
    }

    async fn cancel_by_offer_id(
        &mut self,
        offer_id: i64,
        actor: &str,
        reason: CancelledReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE loan_package_offer_interests
            SET status = 'CANCELLED', cancelled_reason = $3, cancelled_by = $2,
                cancelled_at = $4, updated_at = $4
            WHERE offer_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(offer_id)
        .bind(actor)
        .bind(reason.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "offer", offer_id))?;

        Ok(result.rows_affected())
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

        let result = sqlx::query(
            r#"
            UPDATE loan_package_offer_interests
            SET status = 'CANCELLED', cancelled_reason = $3, cancelled_by = $2,
                cancelled_at = $4, updated_at = $4
            WHERE offer_id = ANY($1) AND status = 'PENDING'
            "#,
        )
        .bind(offer_ids)
        .bind(actor)
        .bind(CancelledReason::Expired.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
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

        let result = sqlx::query(
            r#"
            UPDATE loan_package_offer_interests
            SET status = 'CANCELLED', cancelled_reason = $3, cancelled_by = $2,
                cancelled_at = $4, updated_at = $4
            WHERE id = ANY($1) AND status = 'PENDING'
            "#,
        )
        .bind(ids)
        .bind(actor)
        .bind(reason.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
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

        let result = sqlx::query(
            r#"
            UPDATE loan_package_offer_interests
            SET status = 'CANCELLED', cancelled_reason = $3, cancelled_by = $2,
                cancelled_at = $4, updated_at = $4
            WHERE request_id = ANY($1) AND status = 'PENDING'
            "#,
        )
        .bind(request_ids)
        .bind(actor)
        .bind(reason.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_interest_status(
        &mut self,
        ids: &[i64],
        status: InterestStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE loan_package_offer_interests SET status = $2, updated_at = $3 WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn attach_contract(
        &mut self,
        interest_id: i64,
        contract_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let rows = sqlx::query(
            "UPDATE loan_package_offer_interests SET contract_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(interest_id)
        .bind(contract_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "offer interest", interest_id))?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::not_found("offer interest", interest_id));
        }
        Ok(())
    }

    async fn create_submission_sheet(
        &mut self,
        request_id: i64,
        submitted_by: &str,
        terms: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<SubmissionSheet> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO submission_sheets (request_id, submitted_by, terms, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(request_id)
        .bind(submitted_by)
        .bind(&terms)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "request", request_id))?;

        Ok(SubmissionSheet {
            id,
            request_id,
            submitted_by: submitted_by.to_string(),
            terms,
            created_at: now,
        })
    }
}

// =========================================================================
// ContractStore
// =========================================================================

#[async_trait]
impl ContractStore for PgTx {
    async fn create_contract(
        &mut self,
        new: NewLoanContract,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanContract> {
        let row: ContractRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO loan_contracts (
                request_id, interest_id, investor_id, account_no, symbol_id, loan_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CONTRACT_COLUMNS}
            "#
        ))
        .bind(new.request_id)
        .bind(new.interest_id)
        .bind(new.investor_id)
        .bind(&new.account_no)
        .bind(new.symbol_id)
        .bind(new.loan_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "contract for interest", new.interest_id))?;

        Ok(row.into())
    }

    async fn get_contract_by_id(&mut self, id: i64) -> StoreResult<LoanContract> {
        let row: ContractRow = sqlx::query_as(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM loan_contracts WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "contract", id))?;

        Ok(row.into())
    }

    async fn find_contract_by_interest_id(
        &mut self,
        interest_id: i64,
    ) -> StoreResult<Option<LoanContract>> {
        let row: Option<ContractRow> = sqlx::query_as(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM loan_contracts WHERE interest_id = $1"
        ))
        .bind(interest_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_guarantee_end(
        &mut self,
        id: i64,
        guarantee_ended_at: DateTime<Utc>,
    ) -> StoreResult<LoanContract> {
        let row: ContractRow = sqlx::query_as(&format!(
            "UPDATE loan_contracts SET guarantee_ended_at = $2 WHERE id = $1 \
             RETURNING {CONTRACT_COLUMNS}"
        ))
        .bind(id)
        .bind(guarantee_ended_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "contract", id))?;

        Ok(row.into())
    }
}

// =========================================================================
// SchedulerStore
// =========================================================================

#[async_trait]
impl SchedulerStore for PgTx {
    async fn get_current_scheduler_config(
        &mut self,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LoanRequestSchedulerConfig>> {
        let row: Option<(i64, Decimal, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, maximum_loan_rate, affected_from, created_at
            FROM loan_request_scheduler_configs
            WHERE affected_from <= $1
            ORDER BY affected_from DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(id, maximum_loan_rate, affected_from, created_at)| {
            LoanRequestSchedulerConfig {
                id,
                maximum_loan_rate,
                affected_from,
                created_at,
            }
        }))
    }

    async fn create_scheduler_config(
        &mut self,
        maximum_loan_rate: Decimal,
        affected_from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoanRequestSchedulerConfig> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO loan_request_scheduler_configs (maximum_loan_rate, affected_from, created_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(maximum_loan_rate)
        .bind(affected_from)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(LoanRequestSchedulerConfig {
            id,
            maximum_loan_rate,
            affected_from,
            created_at: now,
        })
    }

    async fn create_scheduler_job(
        &mut self,
        new: NewSchedulerJob,
        now: DateTime<Utc>,
    ) -> StoreResult<SchedulerJob> {
        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO scheduler_jobs (job_type, status, triggered_by, tracking_data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, job_type, status, triggered_by, tracking_data, created_at
            "#,
        )
        .bind(new.job_type.as_str())
        .bind(new.status.as_str())
        .bind(&new.triggered_by)
        .bind(&new.tracking_data)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn list_scheduler_jobs(
        &mut self,
        job_type: Filter<SchedulerJobType>,
        limit: i64,
    ) -> StoreResult<Vec<SchedulerJob>> {
        let mut qb = QueryBuilder::new(
            "SELECT id, job_type, status, triggered_by, tracking_data, created_at \
             FROM scheduler_jobs WHERE TRUE",
        );
        if let Filter::Present(job_type) = job_type {
            qb.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit);

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        convert_all(rows)
    }
}
