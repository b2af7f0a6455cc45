//! Scheduled Jobs
//!
//! Background batch jobs over the lifecycle store: offer expiration and
//! high loan-rate decline. Each job run is self-contained and never panics
//! or propagates errors to its trigger.

mod expiration;
mod risk_decline;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::domain::{NewSchedulerJob, SchedulerJobStatus, SchedulerJobType};
use crate::notification::Notifier;
use crate::store::{SchedulerStore, Store, StoreError, StoreTx};

pub use expiration::ExpirationScheduler;
pub use risk_decline::{RiskDeclineScheduler, DEFAULT_BATCH_SIZE};

// =========================================================================
// Reports
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Nothing eligible; no audit row written
    Skipped,
    Succeeded,
    Failed,
}

/// Result of one job run
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_type: SchedulerJobType,
    pub outcome: JobOutcome,
    /// Offer ids (expiration) or request ids (decline) that were processed
    pub affected_ids: Vec<i64>,
    pub cancelled_interests: u64,
    pub error: Option<String>,
    /// Audit row, when one was written
    pub job_id: Option<i64>,
    pub started_at: DateTime<Utc>,
}

impl JobReport {
    fn new(job_type: SchedulerJobType, started_at: DateTime<Utc>) -> Self {
        Self {
            job_type,
            outcome: JobOutcome::Skipped,
            affected_ids: Vec::new(),
            cancelled_interests: 0,
            error: None,
            job_id: None,
            started_at,
        }
    }
}

/// Append one audit row in its own transaction. A failure to write it is
/// logged, not raised.
async fn record_job<S: Store>(
    store: &S,
    job_type: SchedulerJobType,
    status: SchedulerJobStatus,
    actor: &str,
    tracking_data: serde_json::Value,
    now: DateTime<Utc>,
) -> Option<i64> {
    let new = NewSchedulerJob {
        job_type,
        status,
        triggered_by: actor.to_string(),
        tracking_data,
    };

    let written = async {
        let mut tx = store.begin().await?;
        let job = tx.create_scheduler_job(new, now).await?;
        tx.commit().await?;
        Ok::<_, JobError>(job.id)
    }
    .await;

    match written {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(job_type = %job_type, error = %e, "Writing scheduler job record failed");
            None
        }
    }
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for offer expiration (default: 1 minute)
    pub expiration_interval: Duration,
    /// Interval for high loan-rate decline (default: 5 minutes)
    pub risk_decline_interval: Duration,
    /// Requests claimed per decline transaction
    pub risk_decline_batch_size: i64,
    /// Actor stamped on scheduler cancellations and job rows
    pub system_actor: String,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            expiration_interval: Duration::from_secs(60),
            risk_decline_interval: Duration::from_secs(300),
            risk_decline_batch_size: DEFAULT_BATCH_SIZE,
            system_actor: "system".to_string(),
        }
    }
}

/// Job Scheduler - runs both lifecycle jobs on their own periods
pub struct JobScheduler<S: Store> {
    expiration: ExpirationScheduler<S>,
    risk_decline: RiskDeclineScheduler<S>,
    config: JobSchedulerConfig,
}

impl<S: Store> JobScheduler<S> {
    /// Create a new job scheduler
    pub fn new(store: S) -> Self {
        Self::with_config(store, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(store: S, config: JobSchedulerConfig) -> Self {
        Self {
            expiration: ExpirationScheduler::new(store.clone(), config.system_actor.clone()),
            risk_decline: RiskDeclineScheduler::new(store, config.system_actor.clone())
                .with_batch_size(config.risk_decline_batch_size),
            config,
        }
    }

    pub fn expiration(&self) -> &ExpirationScheduler<S> {
        &self.expiration
    }

    pub fn risk_decline(&self) -> &RiskDeclineScheduler<S> {
        &self.risk_decline
    }

    /// Dispatch decline notifications through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.risk_decline = self.risk_decline.with_notifier(notifier);
        self
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            expiration_secs = self.config.expiration_interval.as_secs(),
            risk_decline_secs = self.config.risk_decline_interval.as_secs(),
            "Job scheduler started"
        );

        let mut expiration_interval = interval(self.config.expiration_interval);
        let mut risk_decline_interval = interval(self.config.risk_decline_interval);

        loop {
            tokio::select! {
                _ = expiration_interval.tick() => {
                    self.expiration.run().await;
                }
                _ = risk_decline_interval.tick() => {
                    self.risk_decline.run().await;
                }
            }
        }
    }

    /// Run both jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> SchedulerRunReport {
        SchedulerRunReport {
            expiration: self.expiration.run().await,
            risk_decline: self.risk_decline.run().await,
            completed_at: Utc::now(),
        }
    }
}

/// Report from running every job once
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerRunReport {
    pub expiration: JobReport,
    pub risk_decline: JobReport,
    pub completed_at: DateTime<Utc>,
}

impl SchedulerRunReport {
    pub fn errors(&self) -> Vec<String> {
        [&self.expiration, &self.risk_decline]
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.job_type, e)))
            .collect()
    }
}

pub type JobResult<T> = Result<T, JobError>;

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================
