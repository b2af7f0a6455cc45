//! Offer expiration
//!
//! Cancels the PENDING lines of online offers whose expiry has passed.
//! Offers with no PENDING line left are never selected, so re-running
//! against the same state cancels nothing.

use chrono::{DateTime, Utc};

use crate::domain::{SchedulerJobStatus, SchedulerJobType};
use crate::store::{OfferStore, Store, StoreTx};

use super::{record_job, JobOutcome, JobReport, JobResult};

pub struct ExpirationScheduler<S: Store> {
    store: S,
    actor: String,
}

impl<S: Store> ExpirationScheduler<S> {
    pub fn new(store: S, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
        }
    }

    pub async fn run(&self) -> JobReport {
        self.run_at(Utc::now()).await
    }

    /// One pass at `now`. Errors end up in the report and a FAIL job row.
    pub async fn run_at(&self, now: DateTime<Utc>) -> JobReport {
        let mut report = JobReport::new(SchedulerJobType::ExpireOffers, now);

        match self.expire(now).await {
            Ok((offer_ids, cancelled)) => {
                report.affected_ids = offer_ids;
                report.cancelled_interests = cancelled;
                if cancelled == 0 {
                    // nothing to audit
                    report.outcome = JobOutcome::Skipped;
                    return report;
                }
                report.outcome = JobOutcome::Succeeded;
                tracing::info!(
                    job_type = %report.job_type,
                    offers = report.affected_ids.len(),
                    cancelled,
                    "Expired offer interests cancelled"
                );
            }
            Err(e) => {
                tracing::error!(job_type = %report.job_type, error = %e, "Offer expiration failed");
                report.outcome = JobOutcome::Failed;
                report.error = Some(e.to_string());
            }
        }

        let status = if report.outcome == JobOutcome::Failed {
            SchedulerJobStatus::Fail
        } else {
            SchedulerJobStatus::Success
        };
        let tracking = serde_json::json!({
            "offer_ids": report.affected_ids,
            "cancelled_interests": report.cancelled_interests,
            "error": report.error,
        });
        report.job_id = record_job(&self.store, report.job_type, status, &self.actor, tracking, now).await;
        report
    }

    async fn expire(&self, now: DateTime<Utc>) -> JobResult<(Vec<i64>, u64)> {
        let mut tx = self.store.begin().await?;
        let offers = tx.get_expired_offers(now).await?;
        let offer_ids: Vec<i64> = offers.iter().map(|o| o.id).collect();
        let cancelled = tx
            .cancel_expired_offer_interests(&offer_ids, &self.actor, now)
            .await?;
        tx.commit().await?;
        Ok((offer_ids, cancelled))
    }
}
