//! Common test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use loan_broker::domain::{
    FlowType, LoanPackageRequest, NewOfferInterest, OperationContext, RequestTerms, RequestType,
};
use loan_broker::notification::{LoanEvent, Notifier, NotifyError, NotifyResult};
use loan_broker::store::MemoryStore;
use loan_broker::workflow::{CreateRequestCommand, ProposeOfferCommand, ProposeOfferResult};
use loan_broker::ConfirmationWorkflow;

pub const ADMIN: &str = "ops.admin";
pub const SYMBOL: i64 = 1001;

/// Keeps every dispatched event in memory. Optionally fails every dispatch.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LoanEvent>>,
    fail_with: Option<NotifyError>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: NotifyError) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_with: Some(error),
        }
    }

    pub fn events(&self) -> Vec<LoanEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &LoanEvent) -> NotifyResult<()> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// In-memory workflow with a notifier that records every event
pub struct Harness {
    pub store: MemoryStore,
    pub workflow: ConfirmationWorkflow<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(RecordingNotifier::new())
}

pub fn harness_with(notifier: RecordingNotifier) -> Harness {
    let store = MemoryStore::new();
    let notifier = Arc::new(notifier);
    let dyn_notifier: Arc<dyn Notifier> = notifier.clone();
    let workflow = ConfirmationWorkflow::with_notifier(store.clone(), dyn_notifier);
    Harness {
        store,
        workflow,
        notifier,
    }
}

pub fn admin() -> OperationContext {
    OperationContext::admin(ADMIN)
}

pub async fn create_request(
    workflow: &ConfirmationWorkflow<MemoryStore>,
    investor_id: i64,
    loan_rate: Decimal,
) -> LoanPackageRequest {
    create_request_on(workflow, investor_id, SYMBOL, loan_rate).await
}

pub async fn create_request_on(
    workflow: &ConfirmationWorkflow<MemoryStore>,
    investor_id: i64,
    symbol_id: i64,
    loan_rate: Decimal,
) -> LoanPackageRequest {
    let command = CreateRequestCommand {
        symbol_id,
        investor_id,
        account_no: format!("{:06}C", investor_id),
        request_type: RequestType::Flexible,
        terms: RequestTerms::Underlying {
            loan_rate,
            limit_amount: dec!(500000000),
        },
    };
    workflow
        .create_request(command, &OperationContext::investor(investor_id))
        .await
        .expect("create request")
}

pub fn line(loan_id: i64) -> NewOfferInterest {
    NewOfferInterest {
        loan_id,
        score_group_id: None,
        limit_amount: dec!(300000000),
        loan_rate: dec!(0.5),
        interest_rate: dec!(0.135),
        term_days: 90,
    }
}

pub async fn propose(
    workflow: &ConfirmationWorkflow<MemoryStore>,
    request_id: i64,
    flow_type: FlowType,
    loan_ids: &[i64],
    expired_at: Option<DateTime<Utc>>,
) -> ProposeOfferResult {
    let command = ProposeOfferCommand {
        request_id,
        flow_type,
        expired_at,
        terms: serde_json::json!({ "policy": "standard" }),
        interests: loan_ids.iter().copied().map(line).collect(),
    };
    workflow
        .propose_offer(command, &admin())
        .await
        .expect("propose offer")
}

/// Connect to DATABASE_URL and empty every lifecycle table.
/// None when no database is configured.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        r#"
        TRUNCATE TABLE loan_contracts, loan_package_offer_interests, loan_package_offers,
            submission_sheets, loan_package_requests, loan_request_scheduler_configs,
            scheduler_jobs
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    Some(pool)
}
