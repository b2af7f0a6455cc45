//! Risk configuration and scheduler job history

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    DomainError, Filter, LoanRequestSchedulerConfig, OperationContext, Page, SchedulerJob,
    SchedulerJobType,
};
use crate::error::AppResult;
use crate::store::{SchedulerStore, Store, StoreTx};

use super::ConfirmationWorkflow;

impl<S: Store> ConfirmationWorkflow<S> {
    /// Append a loan-rate ceiling. The newest config effective at a given
    /// instant wins; older rows stay as history.
    pub async fn create_scheduler_config(
        &self,
        maximum_loan_rate: Decimal,
        affected_from: DateTime<Utc>,
        context: &OperationContext,
    ) -> AppResult<LoanRequestSchedulerConfig> {
        if maximum_loan_rate <= Decimal::ZERO || maximum_loan_rate >= Decimal::ONE {
            return Err(DomainError::validation(format!(
                "maximum loan rate must be within (0, 1), got {}",
                maximum_loan_rate
            ))
            .into());
        }

        let mut tx = self.store.begin().await?;
        let config = tx
            .create_scheduler_config(maximum_loan_rate, affected_from, Utc::now())
            .await?;
        tx.commit().await?;

        tracing::info!(
            config_id = config.id,
            maximum_loan_rate = %config.maximum_loan_rate,
            affected_from = %config.affected_from,
            actor = %context.actor_name(),
            "Risk decline config created"
        );
        Ok(config)
    }

    pub async fn current_scheduler_config(&self) -> AppResult<Option<LoanRequestSchedulerConfig>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.get_current_scheduler_config(Utc::now()).await?)
    }

    pub async fn list_scheduler_jobs(
        &self,
        job_type: Filter<SchedulerJobType>,
        limit: i64,
    ) -> AppResult<Vec<SchedulerJob>> {
        let mut tx = self.store.begin().await?;
        Ok(tx
            .list_scheduler_jobs(job_type, limit.clamp(1, Page::MAX_LIMIT))
            .await?)
    }
}
