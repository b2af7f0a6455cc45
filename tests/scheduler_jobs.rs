//! Expiration and high loan-rate decline jobs over the in-memory store

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use loan_broker::domain::{
    CancelledReason, CombinedStatus, Filter, FlowType, InterestStatus, RequestStatus,
    SchedulerJobStatus, SchedulerJobType,
};
use loan_broker::jobs::{
    ExpirationScheduler, JobOutcome, JobScheduler, JobSchedulerConfig, RiskDeclineScheduler,
};
use loan_broker::notification::{LoanEvent, Notifier};
use loan_broker::store::{LockMode, MemoryStore, OfferStore, RequestStore, SchedulerStore, Store};
use loan_broker::workflow::AdminCancelCommand;

mod common;
use common::{admin, create_request, harness, propose};

async fn jobs_of(store: &MemoryStore, job_type: SchedulerJobType) -> Vec<loan_broker::domain::SchedulerJob> {
    let mut tx = store.begin().await.unwrap();
    tx.list_scheduler_jobs(Filter::Present(job_type), 50).await.unwrap()
}

// =========================================================================
// Offer expiration
// =========================================================================

#[tokio::test]
async fn test_expiration_cancels_only_pending_lines() {
    let h = harness();
    let request = create_request(&h.workflow, 5, dec!(0.25)).await;
    let now = Utc::now();
    let online = propose(
        &h.workflow,
        request.id,
        FlowType::Online,
        &[30, 31],
        Some(now + Duration::hours(1)),
    )
    .await;
    let offline = propose(
        &h.workflow,
        request.id,
        FlowType::Offline,
        &[40],
        Some(now + Duration::hours(1)),
    )
    .await;

    // one line of the online offer is already resolved
    h.workflow
        .admin_cancel(
            AdminCancelCommand {
                request_id: request.id,
                loan_ids: vec![31],
                on_behalf_of_investor: false,
            },
            &admin(),
        )
        .await
        .unwrap();

    let scheduler = ExpirationScheduler::new(h.store.clone(), "system");
    let later = now + Duration::hours(2);
    let report = scheduler.run_at(later).await;

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    assert_eq!(report.affected_ids, vec![online.offer.id]);
    assert_eq!(report.cancelled_interests, 1);
    assert!(report.job_id.is_some());

    let mut tx = h.store.begin().await.unwrap();
    let l3 = tx.find_interest_by_id(online.interests[0].id).await.unwrap();
    assert_eq!(l3.status, InterestStatus::Cancelled);
    assert_eq!(l3.cancelled_reason, CancelledReason::Expired);
    assert_eq!(l3.cancelled_by.as_deref(), Some("system"));

    let l4 = tx.find_interest_by_id(online.interests[1].id).await.unwrap();
    assert_eq!(l4.cancelled_reason, CancelledReason::Admin);

    let offline_line = tx.find_interest_by_id(offline.interests[0].id).await.unwrap();
    assert_eq!(offline_line.status, InterestStatus::Pending);

    // expiry does not close the request
    assert_eq!(
        tx.get_request_by_id(request.id).await.unwrap().status,
        RequestStatus::Pending
    );
    drop(tx);

    let jobs = jobs_of(&h.store, SchedulerJobType::ExpireOffers).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SchedulerJobStatus::Success);
    assert_eq!(jobs[0].triggered_by, "system");
}

#[tokio::test]
async fn test_expiration_is_idempotent() {
    let h = harness();
    let request = create_request(&h.workflow, 5, dec!(0.25)).await;
    let now = Utc::now();
    propose(
        &h.workflow,
        request.id,
        FlowType::Online,
        &[30],
        Some(now + Duration::minutes(5)),
    )
    .await;

    let scheduler = ExpirationScheduler::new(h.store.clone(), "system");
    let later = now + Duration::hours(1);

    let first = scheduler.run_at(later).await;
    assert_eq!(first.cancelled_interests, 1);

    let second = scheduler.run_at(later).await;
    assert_eq!(second.outcome, JobOutcome::Skipped);
    assert_eq!(second.cancelled_interests, 0);
    assert!(second.affected_ids.is_empty());
    assert!(second.job_id.is_none());

    assert_eq!(jobs_of(&h.store, SchedulerJobType::ExpireOffers).await.len(), 1);
}

#[tokio::test]
async fn test_unexpired_offers_are_left_alone() {
    let h = harness();
    let request = create_request(&h.workflow, 5, dec!(0.25)).await;
    let offer = propose(
        &h.workflow,
        request.id,
        FlowType::Online,
        &[30],
        Some(Utc::now() + Duration::days(1)),
    )
    .await;

    let report = ExpirationScheduler::new(h.store.clone(), "system").run().await;
    assert_eq!(report.outcome, JobOutcome::Skipped);

    let mut tx = h.store.begin().await.unwrap();
    let line = tx.find_interest_by_id(offer.interests[0].id).await.unwrap();
    assert_eq!(line.status, InterestStatus::Pending);
}

#[tokio::test]
async fn test_expiration_failure_is_recorded_and_rolled_back() {
    let h = harness();
    let now = Utc::now();
    let expiry = Some(now + Duration::minutes(10));
    let first = create_request(&h.workflow, 5, dec!(0.25)).await;
    let second = create_request(&h.workflow, 6, dec!(0.25)).await;
    let free = propose(&h.workflow, first.id, FlowType::Online, &[30], expiry).await;
    let held = propose(&h.workflow, second.id, FlowType::Online, &[31, 32], expiry).await;

    let mut holder = h.store.begin().await.unwrap();
    holder
        .get_interests_by_offer_id_with_lock(held.offer.id)
        .await
        .unwrap();

    let report = ExpirationScheduler::new(h.store.clone(), "system")
        .run_at(now + Duration::hours(1))
        .await;
    drop(holder);

    assert_eq!(report.outcome, JobOutcome::Failed);
    assert_eq!(report.cancelled_interests, 0);
    let error = report.error.clone().unwrap();
    assert!(error.contains("locked by another transaction"), "{}", error);

    // one transaction: the free offer was not expired either
    let mut tx = h.store.begin().await.unwrap();
    for line in free.interests.iter().chain(&held.interests) {
        let line = tx.find_interest_by_id(line.id).await.unwrap();
        assert_eq!(line.status, InterestStatus::Pending);
    }
    drop(tx);

    let jobs = jobs_of(&h.store, SchedulerJobType::ExpireOffers).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SchedulerJobStatus::Fail);
    assert_eq!(Some(jobs[0].id), report.job_id);
    assert_eq!(jobs[0].tracking_data["error"], serde_json::json!(error));

    // the next run picks both offers up
    let retry = ExpirationScheduler::new(h.store.clone(), "system")
        .run_at(now + Duration::hours(1))
        .await;
    assert_eq!(retry.outcome, JobOutcome::Succeeded);
    assert_eq!(retry.cancelled_interests, 3);
}

// =========================================================================
// High loan-rate decline
// =========================================================================

#[tokio::test]
async fn test_risk_decline_claims_requests_over_the_ceiling() {
    let h = harness();
    let now = Utc::now();
    h.workflow
        .create_scheduler_config(dec!(0.20), now - Duration::days(1), &admin())
        .await
        .unwrap();

    let over = create_request(&h.workflow, 5, dec!(0.22)).await;
    let under = create_request(&h.workflow, 6, dec!(0.15)).await;
    let offer = propose(&h.workflow, over.id, FlowType::Offline, &[50, 51], None).await;
    propose(&h.workflow, under.id, FlowType::Offline, &[52], None).await;

    let notifier: Arc<dyn Notifier> = h.notifier.clone();
    let report = RiskDeclineScheduler::new(h.store.clone(), "system")
        .with_notifier(notifier)
        .run_at(now)
        .await;

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    assert_eq!(report.affected_ids, vec![over.id]);
    assert_eq!(report.cancelled_interests, 2);

    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(tx.get_request_by_id(over.id).await.unwrap().status, RequestStatus::Confirmed);
    assert_eq!(tx.get_request_by_id(under.id).await.unwrap().status, RequestStatus::Pending);
    for line in &offer.interests {
        let line = tx.find_interest_by_id(line.id).await.unwrap();
        assert_eq!(line.status, InterestStatus::Cancelled);
        assert_eq!(line.cancelled_reason, CancelledReason::HighLoanRate);
    }
    drop(tx);

    let jobs = jobs_of(&h.store, SchedulerJobType::DeclineHighLoanRequests).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SchedulerJobStatus::Success);
    assert_eq!(
        jobs[0].tracking_data["declined_request_ids"],
        serde_json::json!([over.id])
    );

    assert!(h.notifier.events().iter().any(|e| matches!(
        e,
        LoanEvent::RequestDeclined { request_id, reason: CancelledReason::HighLoanRate, .. }
            if *request_id == over.id
    )));
}

#[tokio::test]
async fn test_risk_decline_without_effective_config_is_a_noop() {
    let h = harness();
    let now = Utc::now();
    let request = create_request(&h.workflow, 5, dec!(0.9)).await;

    let scheduler = RiskDeclineScheduler::new(h.store.clone(), "system");
    let report = scheduler.run_at(now).await;
    assert_eq!(report.outcome, JobOutcome::Skipped);
    assert!(report.error.is_none());

    // not effective yet
    h.workflow
        .create_scheduler_config(dec!(0.20), now + Duration::days(1), &admin())
        .await
        .unwrap();
    let report = scheduler.run_at(now).await;
    assert_eq!(report.outcome, JobOutcome::Skipped);

    assert!(jobs_of(&h.store, SchedulerJobType::DeclineHighLoanRequests)
        .await
        .is_empty());
    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(
        tx.get_request_by_id(request.id).await.unwrap().status,
        RequestStatus::Pending
    );
}

#[tokio::test]
async fn test_risk_decline_runs_in_batches_and_skips_locked_rows() {
    let h = harness();
    let now = Utc::now();
    h.workflow
        .create_scheduler_config(dec!(0.30), now - Duration::hours(1), &admin())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for investor in 1..=5 {
        ids.push(create_request(&h.workflow, investor, dec!(0.35)).await.id);
    }
    let held = ids[2];

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_request_by_id(held, LockMode::NoWait).await.unwrap();

    let report = RiskDeclineScheduler::new(h.store.clone(), "system")
        .with_batch_size(2)
        .run_at(now)
        .await;
    drop(holder);

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    let mut declined = report.affected_ids.clone();
    declined.sort_unstable();
    let expected: Vec<i64> = ids.iter().copied().filter(|id| *id != held).collect();
    assert_eq!(declined, expected);

    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(tx.get_request_by_id(held).await.unwrap().status, RequestStatus::Pending);

    // one audit row for the whole run
    drop(tx);
    assert_eq!(
        jobs_of(&h.store, SchedulerJobType::DeclineHighLoanRequests).await.len(),
        1
    );

    // the held request is picked up by the next run
    let next = RiskDeclineScheduler::new(h.store.clone(), "system")
        .run_at(now)
        .await;
    assert_eq!(next.affected_ids, vec![held]);
}

#[tokio::test]
async fn test_risk_decline_failure_keeps_committed_batches() {
    let h = harness();
    let now = Utc::now();
    h.workflow
        .create_scheduler_config(dec!(0.20), now - Duration::days(1), &admin())
        .await
        .unwrap();

    let first = create_request(&h.workflow, 5, dec!(0.30)).await;
    let second = create_request(&h.workflow, 6, dec!(0.40)).await;
    let first_offer = propose(&h.workflow, first.id, FlowType::Offline, &[60], None).await;
    let second_offer = propose(&h.workflow, second.id, FlowType::Offline, &[61], None).await;

    // the second request's lines are held, so its batch cannot cancel them
    let mut holder = h.store.begin().await.unwrap();
    holder
        .get_interests_by_offer_id_with_lock(second_offer.offer.id)
        .await
        .unwrap();

    let report = RiskDeclineScheduler::new(h.store.clone(), "system")
        .with_batch_size(1)
        .run_at(now)
        .await;
    drop(holder);

    assert_eq!(report.outcome, JobOutcome::Failed);
    assert_eq!(report.affected_ids, vec![first.id]);
    assert_eq!(report.cancelled_interests, 1);
    let error = report.error.clone().unwrap();
    assert!(error.contains("locked by another transaction"), "{}", error);

    // the first batch stays committed, the failed one rolled back
    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(tx.get_request_by_id(first.id).await.unwrap().status, RequestStatus::Confirmed);
    assert_eq!(tx.get_request_by_id(second.id).await.unwrap().status, RequestStatus::Pending);
    let declined = tx.find_interest_by_id(first_offer.interests[0].id).await.unwrap();
    assert_eq!(declined.cancelled_reason, CancelledReason::HighLoanRate);
    let untouched = tx.find_interest_by_id(second_offer.interests[0].id).await.unwrap();
    assert_eq!(untouched.status, InterestStatus::Pending);
    drop(tx);

    let jobs = jobs_of(&h.store, SchedulerJobType::DeclineHighLoanRequests).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SchedulerJobStatus::Fail);
    assert_eq!(
        jobs[0].tracking_data["declined_request_ids"],
        serde_json::json!([first.id])
    );
    assert_eq!(jobs[0].tracking_data["cancelled_interests"], 1);
    assert_eq!(jobs[0].tracking_data["error"], serde_json::json!(error));
}

#[tokio::test]
async fn test_job_scheduler_runs_both_jobs_once() {
    let h = harness();
    let now = Utc::now();
    h.workflow
        .create_scheduler_config(dec!(0.20), now - Duration::days(1), &admin())
        .await
        .unwrap();
    let request = create_request(&h.workflow, 5, dec!(0.25)).await;

    let config = JobSchedulerConfig {
        system_actor: "loan-scheduler".to_string(),
        ..JobSchedulerConfig::default()
    };
    let scheduler = JobScheduler::with_config(h.store.clone(), config);
    let report = scheduler.run_all_once().await;

    assert!(report.errors().is_empty());
    assert_eq!(report.expiration.outcome, JobOutcome::Skipped);
    assert_eq!(report.risk_decline.affected_ids, vec![request.id]);

    let jobs = jobs_of(&h.store, SchedulerJobType::DeclineHighLoanRequests).await;
    assert_eq!(jobs[0].triggered_by, "loan-scheduler");

    let mut tx = h.store.begin().await.unwrap();
    let lines = tx.find_interests_by_request_ids(&[request.id]).await.unwrap();
    assert!(lines.is_empty());
    drop(tx);

    // declined before any offer: only the job row names the high loan rate
    let combined = h.workflow.combined_status(request.id).await.unwrap();
    assert_eq!(combined.request.status, RequestStatus::Confirmed);
    assert_eq!(
        combined.combined_status,
        CombinedStatus::Cancelled {
            reason: CancelledReason::Admin
        }
    );
    assert_eq!(
        jobs[0].tracking_data["declined_request_ids"],
        serde_json::json!([request.id])
    );
}
