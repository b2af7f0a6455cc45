//! Postgres store tests
//!
//! These need a migrated database at DATABASE_URL and truncate every
//! lifecycle table. Run with: cargo test --test integration_postgres -- --ignored

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use loan_broker::domain::{
    CancelledReason, FlowType, InterestStatus, NewLoanContract, NewLoanPackageRequest,
    OperationContext, RequestStatus, RequestTerms, RequestType,
};
use loan_broker::jobs::{ExpirationScheduler, JobOutcome};
use loan_broker::store::{
    ContractStore, LockMode, OfferStore, PgStore, RequestStore, Store, StoreError, StoreTx,
};
use loan_broker::workflow::{AdminConfirmCommand, ProposeOfferCommand};
use loan_broker::{AppError, ConfirmationWorkflow};

mod common;

fn new_request(investor_id: i64, loan_rate: rust_decimal::Decimal) -> NewLoanPackageRequest {
    NewLoanPackageRequest {
        symbol_id: common::SYMBOL,
        investor_id,
        account_no: format!("{:06}C", investor_id),
        request_type: RequestType::Flexible,
        terms: RequestTerms::Underlying {
            loan_rate,
            limit_amount: dec!(1000000000),
        },
    }
}

async fn store() -> Option<PgStore> {
    common::setup_test_db().await.map(PgStore::new)
}

#[tokio::test]
#[ignore]
async fn test_nowait_lock_conflict_is_reported() {
    let Some(store) = store().await else { return };

    let mut setup = store.begin().await.unwrap();
    let request = setup.create_request(new_request(5, dec!(0.25)), Utc::now()).await.unwrap();
    setup.commit().await.unwrap();

    let mut first = store.begin().await.unwrap();
    first.lock_request_by_id(request.id, LockMode::NoWait).await.unwrap();

    let mut second = store.begin().await.unwrap();
    let err = second
        .lock_request_by_id(request.id, LockMode::NoWait)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LockConflict { .. }), "got {:?}", err);
    drop(second);

    // missing rows stay NotFound
    let mut third = store.begin().await.unwrap();
    let err = third.lock_request_by_id(i64::MAX, LockMode::NoWait).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }), "got {:?}", err);
}

#[tokio::test]
#[ignore]
async fn test_skip_locked_batch_leaves_claimed_rows() {
    let Some(store) = store().await else { return };

    let mut setup = store.begin().await.unwrap();
    let a = setup.create_request(new_request(5, dec!(0.30)), Utc::now()).await.unwrap();
    let b = setup.create_request(new_request(6, dec!(0.35)), Utc::now()).await.unwrap();
    setup.create_request(new_request(7, dec!(0.10)), Utc::now()).await.unwrap();
    setup.commit().await.unwrap();

    let mut first = store.begin().await.unwrap();
    first.lock_request_by_id(a.id, LockMode::NoWait).await.unwrap();

    let mut second = store.begin().await.unwrap();
    let claimed = second.lock_pending_above_rate(dec!(0.20), 100).await.unwrap();
    let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id]);
}

#[tokio::test]
#[ignore]
async fn test_admin_confirm_and_expiration_on_postgres() {
    let Some(store) = store().await else { return };
    let workflow = ConfirmationWorkflow::new(store.clone());
    let admin = OperationContext::admin(common::ADMIN);

    let mut setup = store.begin().await.unwrap();
    let confirmed = setup.create_request(new_request(5, dec!(0.25)), Utc::now()).await.unwrap();
    let expiring = setup.create_request(new_request(6, dec!(0.25)), Utc::now()).await.unwrap();
    setup.commit().await.unwrap();

    let offer = |request_id, flow_type, loan_ids: &[i64]| ProposeOfferCommand {
        request_id,
        flow_type,
        expired_at: Some(Utc::now() + Duration::minutes(30)),
        terms: serde_json::json!({}),
        interests: loan_ids.iter().copied().map(common::line).collect(),
    };

    workflow
        .propose_offer(offer(confirmed.id, FlowType::Offline, &[77, 78]), &admin)
        .await
        .unwrap();
    let result = workflow
        .admin_confirm_with_loan_id(
            AdminConfirmCommand {
                request_id: confirmed.id,
                loan_id: 77,
            },
            &admin,
        )
        .await
        .unwrap();
    assert!(result.contract.is_some());

    let mut tx = store.begin().await.unwrap();
    assert_eq!(
        tx.get_request_by_id(confirmed.id).await.unwrap().status,
        RequestStatus::Confirmed
    );
    let lines = tx.find_interests_by_request_ids(&[confirmed.id]).await.unwrap();
    assert_eq!(lines.iter().filter(|l| l.status.is_accepted()).count(), 1);
    drop(tx);

    let online = workflow
        .propose_offer(offer(expiring.id, FlowType::Online, &[90]), &admin)
        .await
        .unwrap();
    let scheduler = ExpirationScheduler::new(store.clone(), "system");
    let report = scheduler.run_at(Utc::now() + Duration::hours(1)).await;
    assert_eq!(report.outcome, JobOutcome::Succeeded);
    assert_eq!(report.affected_ids, vec![online.offer.id]);

    let mut tx = store.begin().await.unwrap();
    let line = tx.find_interest_by_id(online.interests[0].id).await.unwrap();
    assert_eq!(line.status, InterestStatus::Cancelled);
    assert_eq!(line.cancelled_reason, CancelledReason::Expired);
    drop(tx);

    let again = scheduler.run_at(Utc::now() + Duration::hours(1)).await;
    assert_eq!(again.outcome, JobOutcome::Skipped);
}

#[tokio::test]
#[ignore]
async fn test_unique_contract_violation_rolls_back_confirm() {
    let Some(store) = store().await else { return };
    let workflow = ConfirmationWorkflow::new(store.clone());
    let admin = OperationContext::admin(common::ADMIN);

    let mut setup = store.begin().await.unwrap();
    let request = setup.create_request(new_request(5, dec!(0.25)), Utc::now()).await.unwrap();
    setup.commit().await.unwrap();

    let proposed = workflow
        .propose_offer(
            ProposeOfferCommand {
                request_id: request.id,
                flow_type: FlowType::Offline,
                expired_at: None,
                terms: serde_json::json!({}),
                interests: vec![common::line(77), common::line(78)],
            },
            &admin,
        )
        .await
        .unwrap();

    let mut setup = store.begin().await.unwrap();
    setup
        .create_contract(
            NewLoanContract::for_line(&request, &proposed.interests[0]),
            Utc::now(),
        )
        .await
        .unwrap();
    setup.commit().await.unwrap();

    let err = workflow
        .admin_confirm_with_loan_id(
            AdminConfirmCommand {
                request_id: request.id,
                loan_id: 77,
            },
            &admin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Storage(_)), "got {:?}", err);

    let mut tx = store.begin().await.unwrap();
    assert_eq!(
        tx.get_request_by_id(request.id).await.unwrap().status,
        RequestStatus::Pending
    );
    let lines = tx.find_interests_by_request_ids(&[request.id]).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.status == InterestStatus::Pending));
}
