//! Cancel paths
//!
//! Cancellation never closes the request on its own; the derived status
//! reads CANCELLED once no line is left open.

use chrono::Utc;
use std::collections::HashMap;

use crate::domain::transition::ensure_transition;
use crate::domain::{
    CancelledReason, CombinedLoanRequest, DomainError, FlowType, InterestStatus,
    LoanPackageOffer, LoanPackageOfferInterest, LoanPackageRequest, OperationContext,
    RequestStatus,
};
use crate::error::{AppError, AppResult};
use crate::notification::LoanEvent;
use crate::store::{LockMode, OfferStore, RequestStore, Store, StoreTx};

use super::{
    ensure_owner, AdminCancelCommand, CancelResult, ConfirmationWorkflow, DeclineResult,
    WithdrawSymbolResult,
};

impl<S: Store> ConfirmationWorkflow<S> {
    /// Cancel the request's PENDING lines carrying the given loan products.
    ///
    /// The request itself stays PENDING so a new offer can still be proposed;
    /// once no line is open its derived status reads CANCELLED.
    pub async fn admin_cancel(
        &self,
        command: AdminCancelCommand,
        context: &OperationContext,
    ) -> AppResult<CancelResult> {
        if command.loan_ids.is_empty() {
            return Err(DomainError::validation("at least one loan id is required").into());
        }

        let now = Utc::now();
        let actor = context.actor_name();
        let reason = if command.on_behalf_of_investor {
            CancelledReason::Investor
        } else {
            CancelledReason::Admin
        };

        let mut tx = self.store.begin().await?;
        let request = tx
            .lock_request_by_id(command.request_id, LockMode::NoWait)
            .await?;
        let offers: HashMap<i64, LoanPackageOffer> = tx
            .find_offers_by_request_id(request.id)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();
        let lines = tx.find_interests_by_request_ids(&[request.id]).await?;

        let mut targets: Vec<LoanPackageOfferInterest> = Vec::new();
        for loan_id in &command.loan_ids {
            let matching: Vec<&LoanPackageOfferInterest> =
                lines.iter().filter(|l| l.loan_id == *loan_id).collect();
            if matching.is_empty() {
                return Err(AppError::NotFound {
                    entity: "loan",
                    id: *loan_id,
                });
            }

            let pending: Vec<&LoanPackageOfferInterest> = matching
                .iter()
                .copied()
                .filter(|l| l.status == InterestStatus::Pending)
                .collect();
            if pending.is_empty() {
                let line = matching[0];
                let flow = flow_of(&offers, line.offer_id);
                ensure_transition(line.status, InterestStatus::Cancelled, flow)?;
            }
            for line in pending {
                ensure_transition(line.status, InterestStatus::Cancelled, flow_of(&offers, line.offer_id))?;
                targets.push(line.clone());
            }
        }

        let mut offer_ids: Vec<i64> = targets.iter().map(|l| l.offer_id).collect();
        offer_ids.sort_unstable();
        offer_ids.dedup();
        for offer_id in &offer_ids {
            tx.get_interests_by_offer_id_with_lock(*offer_id).await?;
        }

        let ids: Vec<i64> = targets.iter().map(|l| l.id).collect();
        tx.cancel_interests_by_ids(&ids, &actor, reason, now).await?;

        let after = tx.find_interests_by_request_ids(&[request.id]).await?;
        let combined = CombinedLoanRequest::new(request.clone(), &after);
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            cancelled = ids.len(),
            reason = %reason,
            actor = %actor,
            "Offer interests cancelled"
        );

        let dispatch_error = if combined.combined_status.is_cancelled() {
            self.dispatch(declined_event(&request, reason)).await
        } else {
            None
        };

        Ok(CancelResult {
            request_id: request.id,
            cancelled_interest_ids: ids,
            request_status: request.status,
            combined_status: combined.combined_status,
            dispatch_error,
        })
    }

    /// Investor turns down every open line of one offer.
    pub async fn investor_decline(
        &self,
        offer_id: i64,
        context: &OperationContext,
    ) -> AppResult<DeclineResult> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let (offer, request) = tx.find_offer_by_id_with_request(offer_id).await?;
        ensure_owner(context, &request)?;

        tx.lock_request_by_id(request.id, LockMode::NoWait).await?;
        let lines = tx.get_interests_by_offer_id_with_lock(offer.id).await?;
        match lines.iter().find(|l| l.status == InterestStatus::Pending) {
            Some(line) => ensure_transition(line.status, InterestStatus::Cancelled, offer.flow_type)?,
            None => {
                let from = lines
                    .first()
                    .map(|l| l.status)
                    .unwrap_or(InterestStatus::Cancelled);
                return Err(DomainError::InvalidTransition {
                    from,
                    to: InterestStatus::Cancelled,
                    flow: offer.flow_type,
                }
                .into());
            }
        }

        let cancelled = tx
            .cancel_by_offer_id(offer.id, &context.actor_name(), CancelledReason::Investor, now)
            .await?;
        let after = tx.find_interests_by_request_ids(&[request.id]).await?;
        let combined = CombinedLoanRequest::new(request.clone(), &after);
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            offer_id = offer.id,
            cancelled,
            "Offer declined by investor"
        );

        Ok(DeclineResult {
            offer_id: offer.id,
            request_id: request.id,
            cancelled,
            combined_status: combined.combined_status,
        })
    }

    /// Claim every pending request on a symbol, cancel their open lines and
    /// close them. Requests locked elsewhere are left for their holder.
    pub async fn withdraw_symbol(
        &self,
        symbol_id: i64,
        context: &OperationContext,
    ) -> AppResult<WithdrawSymbolResult> {
        let now = Utc::now();
        let actor = context.actor_name();
        let mut tx = self.store.begin().await?;

        let claimed = tx.lock_pending_by_symbol(symbol_id).await?;
        let request_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        let cancelled_interests = tx
            .cancel_pending_by_request_ids(&request_ids, &actor, CancelledReason::Admin, now)
            .await?;
        tx.update_request_status_by_ids(&request_ids, RequestStatus::Confirmed, now)
            .await?;
        tx.commit().await?;

        tracing::info!(
            symbol_id,
            requests = request_ids.len(),
            cancelled_interests,
            actor = %actor,
            "Symbol withdrawn"
        );

        let mut dispatch_errors = Vec::new();
        for request in &claimed {
            if let Some(err) = self.dispatch(declined_event(request, CancelledReason::Admin)).await {
                dispatch_errors.push(err);
            }
        }

        Ok(WithdrawSymbolResult {
            symbol_id,
            request_ids,
            cancelled_interests,
            dispatch_errors,
        })
    }
}

fn flow_of(offers: &HashMap<i64, LoanPackageOffer>, offer_id: i64) -> FlowType {
    offers
        .get(&offer_id)
        .map(|o| o.flow_type)
        .unwrap_or(FlowType::Unspecified)
}

fn declined_event(request: &LoanPackageRequest, reason: CancelledReason) -> LoanEvent {
    LoanEvent::RequestDeclined {
        request_id: request.id,
        investor_id: request.investor_id,
        account_no: request.account_no.clone(),
        symbol_id: request.symbol_id,
        reason,
    }
}
