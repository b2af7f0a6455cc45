//! High loan-rate decline
//!
//! Claims PENDING requests at or above the current risk ceiling with
//! skip-locked reads, cancels their open lines with HIGH_LOAN_RATE and closes
//! them. Work is split into batch-sized transactions; a failure stops the run
//! but keeps what earlier batches committed, and the audit row lists exactly
//! the requests that were committed.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{
    CancelledReason, LoanPackageRequest, LoanRequestSchedulerConfig, RequestStatus,
    SchedulerJobStatus, SchedulerJobType,
};
use crate::notification::{LoanEvent, LogNotifier, Notifier};
use crate::store::{OfferStore, RequestStore, SchedulerStore, Store, StoreTx};

use super::{record_job, JobOutcome, JobReport, JobResult};

pub const DEFAULT_BATCH_SIZE: i64 = 200;

pub struct RiskDeclineScheduler<S: Store> {
    store: S,
    actor: String,
    batch_size: i64,
    notifier: Arc<dyn Notifier>,
}

impl<S: Store> RiskDeclineScheduler<S> {
    pub fn new(store: S, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub async fn run(&self) -> JobReport {
        self.run_at(Utc::now()).await
    }

    /// One full run at `now`. Never fails: errors are folded into the
    /// report and a FAIL job row.
    pub async fn run_at(&self, now: DateTime<Utc>) -> JobReport {
        let mut report = JobReport::new(SchedulerJobType::DeclineHighLoanRequests, now);

        let config = match self.current_config(now).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::debug!(job_type = %report.job_type, "No effective risk config, skipping");
                report.outcome = JobOutcome::Skipped;
                return report;
            }
            Err(e) => {
                tracing::error!(job_type = %report.job_type, error = %e, "Reading risk config failed");
                report.outcome = JobOutcome::Failed;
                report.error = Some(e.to_string());
                let tracking = serde_json::json!({ "error": report.error });
                report.job_id = record_job(
                    &self.store,
                    report.job_type,
                    SchedulerJobStatus::Fail,
                    &self.actor,
                    tracking,
                    now,
                )
                .await;
                return report;
            }
        };

        let mut declined: Vec<LoanPackageRequest> = Vec::new();
        loop {
            match self.decline_batch(&config, now).await {
                Ok((batch, _)) if batch.is_empty() => break,
                Ok((batch, cancelled)) => {
                    report.cancelled_interests += cancelled;
                    declined.extend(batch);
                }
                Err(e) => {
                    tracing::error!(
                        job_type = %report.job_type,
                        declined_so_far = declined.len(),
                        error = %e,
                        "High loan-rate decline batch failed"
                    );
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        report.affected_ids = declined.iter().map(|r| r.id).collect();
        let status = if report.error.is_some() {
            report.outcome = JobOutcome::Failed;
            SchedulerJobStatus::Fail
        } else {
            report.outcome = JobOutcome::Succeeded;
            SchedulerJobStatus::Success
        };

        let tracking = serde_json::json!({
            "config_id": config.id,
            "maximum_loan_rate": config.maximum_loan_rate,
            "declined_request_ids": report.affected_ids,
            "cancelled_interests": report.cancelled_interests,
            "error": report.error,
        });
        report.job_id = record_job(&self.store, report.job_type, status, &self.actor, tracking, now).await;

        tracing::info!(
            job_type = %report.job_type,
            status = %status,
            declined = report.affected_ids.len(),
            cancelled_interests = report.cancelled_interests,
            "High loan-rate decline finished"
        );

        for request in &declined {
            let event = LoanEvent::RequestDeclined {
                request_id: request.id,
                investor_id: request.investor_id,
                account_no: request.account_no.clone(),
                symbol_id: request.symbol_id,
                reason: CancelledReason::HighLoanRate,
            };
            if let Err(e) = self.notifier.notify(&event).await {
                tracing::warn!(request_id = request.id, error = %e, "Notification dispatch failed");
            }
        }

        report
    }

    async fn current_config(
        &self,
        now: DateTime<Utc>,
    ) -> JobResult<Option<LoanRequestSchedulerConfig>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.get_current_scheduler_config(now).await?)
    }

    /// Claim, cancel and close one batch in its own transaction.
    async fn decline_batch(
        &self,
        config: &LoanRequestSchedulerConfig,
        now: DateTime<Utc>,
    ) -> JobResult<(Vec<LoanPackageRequest>, u64)> {
        let mut tx = self.store.begin().await?;
        let claimed = tx
            .lock_pending_above_rate(config.maximum_loan_rate, self.batch_size)
            .await?;
        if claimed.is_empty() {
            return Ok((claimed, 0));
        }

        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        let cancelled = tx
            .cancel_pending_by_request_ids(&ids, &self.actor, CancelledReason::HighLoanRate, now)
            .await?;
        tx.update_request_status_by_ids(&ids, RequestStatus::Confirmed, now)
            .await?;
        tx.commit().await?;

        tracing::debug!(requests = ids.len(), cancelled, "Declined high loan-rate batch");
        Ok((claimed, cancelled))
    }
}
