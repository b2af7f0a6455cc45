//! New-submission flow
//!
//! An admin answers a request with a policy-terms snapshot and an offer of
//! PENDING lines.

use chrono::Utc;

use crate::domain::{
    DomainError, FlowType, NewLoanPackageOffer, OfferWithDetails, OperationContext,
};
use crate::error::AppResult;
use crate::notification::LoanEvent;
use crate::store::{LockMode, OfferStore, RequestStore, Store, StoreTx};

use super::{ensure_investor_scope, ConfirmationWorkflow, ProposeOfferCommand, ProposeOfferResult};

impl<S: Store> ConfirmationWorkflow<S> {
    /// Store the policy-terms snapshot, then an offer with PENDING lines.
    /// The request stays PENDING until one of the lines is accepted.
    pub async fn propose_offer(
        &self,
        command: ProposeOfferCommand,
        context: &OperationContext,
    ) -> AppResult<ProposeOfferResult> {
        if command.interests.is_empty() {
            return Err(DomainError::validation("an offer needs at least one interest line").into());
        }
        for line in &command.interests {
            line.validate()?;
        }
        if command.flow_type == FlowType::Unspecified {
            return Err(DomainError::validation("offer flow must be ONLINE or OFFLINE").into());
        }

        let now = Utc::now();
        if matches!(command.expired_at, Some(at) if at <= now) {
            return Err(DomainError::validation("offer expiry must be in the future").into());
        }

        let actor = context.actor_name();
        let mut tx = self.store.begin().await?;
        let request = tx
            .lock_request_by_id(command.request_id, LockMode::NoWait)
            .await?;
        request.ensure_pending()?;

        let submission_sheet = tx
            .create_submission_sheet(request.id, &actor, command.terms, now)
            .await?;
        let offer = tx
            .create_offer(
                NewLoanPackageOffer {
                    request_id: request.id,
                    offered_by: actor.clone(),
                    flow_type: command.flow_type,
                    expired_at: command.expired_at,
                },
                now,
            )
            .await?;
        let interests = tx.bulk_create_interests(&offer, command.interests, now).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            offer_id = offer.id,
            flow_type = %offer.flow_type,
            lines = interests.len(),
            actor = %actor,
            "Offer proposed"
        );

        let dispatch_error = self
            .dispatch(LoanEvent::OfferReady {
                request_id: request.id,
                investor_id: request.investor_id,
                account_no: request.account_no.clone(),
                symbol_id: request.symbol_id,
                offer_id: offer.id,
            })
            .await;

        Ok(ProposeOfferResult {
            submission_sheet,
            offer,
            interests,
            dispatch_error,
        })
    }

    pub async fn list_offers_for_investor(
        &self,
        investor_id: i64,
        context: &OperationContext,
    ) -> AppResult<Vec<OfferWithDetails>> {
        ensure_investor_scope(context, investor_id)?;
        let mut tx = self.store.begin().await?;
        Ok(tx.find_all_offers_for_investor(investor_id).await?)
    }
}
