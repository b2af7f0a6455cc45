//! Request lifecycle and the dashboard read side

use chrono::Utc;
use std::collections::HashMap;

use crate::domain::{
    CombinedLoanRequest, DomainError, FlowType, InterestStatus, LoanPackageOfferInterest,
    LoanPackageRequest, NewLoanPackageRequest, OperationContext, Page, RequestFilter,
};
use crate::error::AppResult;
use crate::store::{LockMode, OfferStore, RequestStore, Store, StoreTx};

use super::{ensure_investor_scope, ConfirmationWorkflow, CreateRequestCommand, RequestPage};

impl<S: Store> ConfirmationWorkflow<S> {
    pub async fn create_request(
        &self,
        command: CreateRequestCommand,
        context: &OperationContext,
    ) -> AppResult<LoanPackageRequest> {
        ensure_investor_scope(context, command.investor_id)?;

        let new = NewLoanPackageRequest {
            symbol_id: command.symbol_id,
            investor_id: command.investor_id,
            account_no: command.account_no,
            request_type: command.request_type,
            terms: command.terms,
        };
        new.validate()?;

        let mut tx = self.store.begin().await?;
        let request = tx.create_request(new, Utc::now()).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            symbol_id = request.symbol_id,
            investor_id = request.investor_id,
            asset_type = %request.asset_type,
            actor = %context.actor_name(),
            "Loan package request created"
        );

        Ok(request)
    }

    /// Physically delete a request that has not been processed yet.
    pub async fn delete_pending_request(
        &self,
        request_id: i64,
        context: &OperationContext,
    ) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let request = tx.lock_request_by_id(request_id, LockMode::NoWait).await?;
        request.ensure_pending()?;

        let lines = tx.find_interests_by_request_ids(&[request_id]).await?;
        if let Some(accepted) = lines.iter().find(|l| l.status.is_accepted()) {
            return Err(DomainError::InvalidTransition {
                from: accepted.status,
                to: InterestStatus::Cancelled,
                flow: FlowType::Unspecified,
            }
            .into());
        }

        tx.delete_request_by_id(request_id).await?;
        tx.commit().await?;

        tracing::info!(request_id, actor = %context.actor_name(), "Pending request deleted");
        Ok(())
    }

    pub async fn combined_status(&self, request_id: i64) -> AppResult<CombinedLoanRequest> {
        let mut tx = self.store.begin().await?;
        let request = tx.get_request_by_id(request_id).await?;
        let lines = tx.find_interests_by_request_ids(&[request_id]).await?;
        Ok(CombinedLoanRequest::new(request, &lines))
    }

    /// Page and total are read concurrently; either failing fails the call.
    pub async fn list_requests_with_status(
        &self,
        filter: RequestFilter,
        page: Page,
    ) -> AppResult<RequestPage> {
        let (mut page_tx, mut count_tx) =
            tokio::try_join!(self.store.begin(), self.store.begin())?;
        let (requests, total) = tokio::try_join!(
            page_tx.list_requests(&filter, page),
            count_tx.count_requests(&filter),
        )?;

        let ids: Vec<i64> = requests.iter().map(|r| r.id).collect();
        let mut by_request: HashMap<i64, Vec<LoanPackageOfferInterest>> = HashMap::new();
        for line in page_tx.find_interests_by_request_ids(&ids).await? {
            by_request.entry(line.request_id).or_default().push(line);
        }

        let items = requests
            .into_iter()
            .map(|request| {
                let lines = by_request.remove(&request.id).unwrap_or_default();
                CombinedLoanRequest::new(request, &lines)
            })
            .collect();

        Ok(RequestPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }
}
