//! API Routes
//!
//! HTTP endpoint definitions. Handlers only translate between JSON and the
//! workflow; every rule lives in `ConfirmationWorkflow`.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{
    Actor, AssetType, CombinedLoanRequest, DomainError, Filter, FlowType, LoanContract,
    LoanPackageRequest, LoanRequestSchedulerConfig, NewOfferInterest, OfferWithDetails,
    OperationContext, Page, RequestFilter, RequestStatus, RequestType, SchedulerJob,
    SchedulerJobType,
};
use crate::error::AppError;
use crate::jobs::SchedulerRunReport;
use crate::store::Store;
use crate::workflow::{
    AcceptResult, AdminCancelCommand, AdminConfirmCommand, CancelResult, CreateRequestCommand,
    DeclineResult, InvestorAcceptCommand, PackageCreatedResult, ProposeOfferCommand,
    ProposeOfferResult, RequestPage, WithdrawSymbolResult,
};

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default)]
    pub symbol_id: Option<i64>,
    #[serde(default)]
    pub investor_id: Option<i64>,
    #[serde(default)]
    pub account_no: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub loan_rate_from: Option<Decimal>,
    #[serde(default)]
    pub loan_rate_to: Option<Decimal>,
    #[serde(default)]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl ListRequestsQuery {
    fn into_filter(self) -> Result<(RequestFilter, Page), AppError> {
        let filter = RequestFilter {
            symbol_id: self.symbol_id.into(),
            investor_id: self.investor_id.into(),
            account_no: self.account_no.into(),
            status: parse_filter::<RequestStatus>(self.status)?,
            request_type: parse_filter::<RequestType>(self.request_type)?,
            asset_type: parse_filter::<AssetType>(self.asset_type)?,
            loan_rate_from: self.loan_rate_from.into(),
            loan_rate_to: self.loan_rate_to.into(),
            created_from: self.created_from.into(),
            created_to: self.created_to.into(),
        };
        Ok((filter, Page::new(self.limit, self.offset)))
    }
}

/// Closed parse of an optional text filter; unknown text is a client error.
fn parse_filter<T>(value: Option<String>) -> Result<Filter<T>, AppError>
where
    T: FromStr<Err = DomainError>,
{
    Ok(value.map(|s| s.parse::<T>()).transpose()?.into())
}

#[derive(Debug, Deserialize)]
pub struct ProposeOfferRequest {
    pub flow_type: FlowType,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terms: serde_json::Value,
    pub interests: Vec<NewOfferInterest>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub loan_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub loan_ids: Vec<i64>,
    #[serde(default)]
    pub on_behalf_of_investor: bool,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub interest_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GuaranteeEndRequest {
    pub guarantee_ended_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfigRequest {
    pub maximum_loan_rate: Decimal,
    #[serde(default)]
    pub affected_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct CurrentConfigResponse {
    pub config: Option<LoanRequestSchedulerConfig>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        // Requests
        .route("/requests", post(create_request::<S>).get(list_requests::<S>))
        .route(
            "/requests/:request_id",
            get(get_request::<S>).delete(delete_request::<S>),
        )
        .route("/requests/:request_id/offers", post(propose_offer::<S>))
        .route("/requests/:request_id/confirm", post(confirm_request::<S>))
        .route("/requests/:request_id/cancel", post(cancel_request::<S>))
        // Offers
        .route("/offers/:offer_id/accept", post(accept_offer::<S>))
        .route("/offers/:offer_id/decline", post(decline_offer::<S>))
        .route("/investors/:investor_id/offers", get(list_investor_offers::<S>))
        // Packages and contracts
        .route(
            "/interests/:interest_id/package-created",
            post(mark_package_created::<S>),
        )
        .route(
            "/contracts/:contract_id/guarantee-end",
            patch(update_guarantee_end::<S>),
        )
        // Admin
        .route("/symbols/:symbol_id/withdraw", post(withdraw_symbol::<S>))
        .route("/admin/scheduler-configs", post(create_scheduler_config::<S>))
        .route(
            "/admin/scheduler-configs/current",
            get(current_scheduler_config::<S>),
        )
        .route("/admin/scheduler-jobs", get(list_scheduler_jobs::<S>))
        .route("/admin/jobs/run", post(run_jobs::<S>))
}

/// Admin-only operations reject investor callers.
fn require_admin(context: &OperationContext) -> Result<(), AppError> {
    match context.actor {
        Actor::Investor(id) => Err(DomainError::Forbidden(format!(
            "investor {} cannot perform admin operations",
            id
        ))
        .into()),
        _ => Ok(()),
    }
}

// =========================================================================
// Requests
// =========================================================================

async fn create_request<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<CreateRequestCommand>,
) -> Result<(StatusCode, Json<LoanPackageRequest>), AppError> {
    let request = state.workflow.create_request(command, &context).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Investors only ever see their own requests.
async fn list_requests<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<RequestPage>, AppError> {
    let (mut filter, page) = query.into_filter()?;
    if let Some(investor_id) = context.actor.investor_id() {
        filter.investor_id = Filter::Present(investor_id);
    }
    Ok(Json(state.workflow.list_requests_with_status(filter, page).await?))
}

async fn get_request<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<i64>,
) -> Result<Json<CombinedLoanRequest>, AppError> {
    let combined = state.workflow.combined_status(request_id).await?;
    match context.actor.investor_id() {
        // don't reveal other investors' requests
        Some(id) if id != combined.request.investor_id => Err(AppError::NotFound {
            entity: "loan package request",
            id: request_id,
        }),
        _ => Ok(Json(combined)),
    }
}

async fn delete_request<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_admin(&context)?;
    state.workflow.delete_pending_request(request_id, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn propose_offer<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<i64>,
    Json(body): Json<ProposeOfferRequest>,
) -> Result<(StatusCode, Json<ProposeOfferResult>), AppError> {
    require_admin(&context)?;
    let command = ProposeOfferCommand {
        request_id,
        flow_type: body.flow_type,
        expired_at: body.expired_at,
        terms: body.terms,
        interests: body.interests,
    };
    let result = state.workflow.propose_offer(command, &context).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn confirm_request<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<i64>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<AcceptResult>, AppError> {
    require_admin(&context)?;
    let command = AdminConfirmCommand {
        request_id,
        loan_id: body.loan_id,
    };
    Ok(Json(state.workflow.admin_confirm_with_loan_id(command, &context).await?))
}

async fn cancel_request<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<i64>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<CancelResult>, AppError> {
    require_admin(&context)?;
    let command = AdminCancelCommand {
        request_id,
        loan_ids: body.loan_ids,
        on_behalf_of_investor: body.on_behalf_of_investor,
    };
    Ok(Json(state.workflow.admin_cancel(command, &context).await?))
}

// =========================================================================
// Offers
// =========================================================================

async fn accept_offer<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(offer_id): Path<i64>,
    Json(body): Json<AcceptRequest>,
) -> Result<Json<AcceptResult>, AppError> {
    let command = InvestorAcceptCommand {
        offer_id,
        interest_id: body.interest_id,
    };
    Ok(Json(state.workflow.investor_accept(command, &context).await?))
}

async fn decline_offer<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(offer_id): Path<i64>,
) -> Result<Json<DeclineResult>, AppError> {
    Ok(Json(state.workflow.investor_decline(offer_id, &context).await?))
}

async fn list_investor_offers<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(investor_id): Path<i64>,
) -> Result<Json<Vec<OfferWithDetails>>, AppError> {
    Ok(Json(
        state
            .workflow
            .list_offers_for_investor(investor_id, &context)
            .await?,
    ))
}

// =========================================================================
// Packages and contracts
// =========================================================================

async fn mark_package_created<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(interest_id): Path<i64>,
) -> Result<(StatusCode, Json<PackageCreatedResult>), AppError> {
    require_admin(&context)?;
    let result = state.workflow.mark_package_created(interest_id, &context).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn update_guarantee_end<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(contract_id): Path<i64>,
    Json(body): Json<GuaranteeEndRequest>,
) -> Result<Json<LoanContract>, AppError> {
    require_admin(&context)?;
    Ok(Json(
        state
            .workflow
            .update_guarantee_end(contract_id, body.guarantee_ended_at, &context)
            .await?,
    ))
}

// =========================================================================
// Admin
// =========================================================================

async fn withdraw_symbol<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Path(symbol_id): Path<i64>,
) -> Result<Json<WithdrawSymbolResult>, AppError> {
    require_admin(&context)?;
    Ok(Json(state.workflow.withdraw_symbol(symbol_id, &context).await?))
}

async fn create_scheduler_config<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Json(body): Json<SchedulerConfigRequest>,
) -> Result<(StatusCode, Json<LoanRequestSchedulerConfig>), AppError> {
    require_admin(&context)?;
    let affected_from = body.affected_from.unwrap_or_else(Utc::now);
    let config = state
        .workflow
        .create_scheduler_config(body.maximum_loan_rate, affected_from, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn current_scheduler_config<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<CurrentConfigResponse>, AppError> {
    require_admin(&context)?;
    let config = state.workflow.current_scheduler_config().await?;
    Ok(Json(CurrentConfigResponse { config }))
}

async fn list_scheduler_jobs<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<SchedulerJob>>, AppError> {
    require_admin(&context)?;
    let job_type = parse_filter::<SchedulerJobType>(query.job_type)?;
    Ok(Json(state.workflow.list_scheduler_jobs(job_type, query.limit).await?))
}

/// Run both schedulers once, outside their periodic loop.
async fn run_jobs<S: Store>(
    State(state): State<AppState<S>>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<SchedulerRunReport>, AppError> {
    require_admin(&context)?;
    tracing::info!(actor = %context.actor_name(), "Manual job run requested");
    Ok(Json(state.jobs.run_all_once().await))
}
