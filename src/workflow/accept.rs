//! Accept paths and contracts
//!
//! Both accept paths lock the request and then the offer's lines `NoWait`,
//! move the target line forward, cancel every alternative and confirm the
//! request in one transaction.

use chrono::{DateTime, Utc};

use crate::domain::transition::ensure_transition;
use crate::domain::{
    CancelledReason, DomainError, FlowType, InterestStatus, LoanContract, LoanPackageOffer,
    LoanPackageOfferInterest, LoanPackageRequest, NewLoanContract, OperationContext,
    RequestStatus,
};
use crate::error::{AppError, AppResult};
use crate::notification::LoanEvent;
use crate::store::{ContractStore, LockMode, OfferStore, RequestStore, Store, StoreTx};

use super::{
    ensure_owner, AcceptResult, AdminConfirmCommand, ConfirmationWorkflow, InvestorAcceptCommand,
    PackageCreatedResult,
};

impl<S: Store> ConfirmationWorkflow<S> {
    /// Admin confirms a request with a loan product already offered on it.
    ///
    /// The targeted line goes straight to PACKAGE_CREATED and its contract is
    /// written in the same transaction as every sibling cancellation.
    pub async fn admin_confirm_with_loan_id(
        &self,
        command: AdminConfirmCommand,
        context: &OperationContext,
    ) -> AppResult<AcceptResult> {
        let now = Utc::now();
        let actor = context.actor_name();
        let mut tx = self.store.begin().await?;

        let candidates = tx.find_interests_by_request_ids(&[command.request_id]).await?;
        let target = candidates
            .iter()
            .filter(|l| l.loan_id == command.loan_id)
            .min_by_key(|l| (l.status != InterestStatus::Pending, std::cmp::Reverse(l.id)))
            .cloned()
            .ok_or(AppError::NotFound {
                entity: "loan",
                id: command.loan_id,
            })?;

        let mut accept = self
            .lock_for_accept(&mut tx, target.offer_id, target.id, InterestStatus::PackageCreated)
            .await?;

        tx.update_interest_status(&[accept.interest.id], InterestStatus::PackageCreated, now)
            .await?;
        let (cancelled_siblings, cancelled_other_offers) = cascade_alternatives(
            &mut tx,
            &accept.request,
            accept.offer.id,
            &actor,
            now,
        )
        .await?;
        tx.update_request_status_by_id(accept.request.id, RequestStatus::Confirmed, now)
            .await?;

        let contract = tx
            .create_contract(NewLoanContract::for_line(&accept.request, &accept.interest), now)
            .await?;
        tx.attach_contract(accept.interest.id, contract.id, now).await?;
        tx.commit().await?;

        accept.interest.status = InterestStatus::PackageCreated;
        accept.interest.contract_id = Some(contract.id);
        accept.interest.updated_at = now;

        tracing::info!(
            request_id = accept.request.id,
            offer_id = accept.offer.id,
            interest_id = accept.interest.id,
            loan_id = command.loan_id,
            contract_id = contract.id,
            cancelled_siblings,
            cancelled_other_offers,
            actor = %actor,
            "Request confirmed by admin"
        );

        let dispatch_error = self.dispatch(confirmed_event(&accept, Some(&contract))).await;

        Ok(AcceptResult {
            request_id: accept.request.id,
            offer_id: accept.offer.id,
            interest: accept.interest,
            contract: Some(contract),
            cancelled_siblings,
            cancelled_other_offers,
            dispatch_error,
        })
    }

    /// Investor accepts one line of an online offer. The line moves to
    /// CREATING_LOAN_PACKAGE; the contract follows in `mark_package_created`.
    pub async fn investor_accept(
        &self,
        command: InvestorAcceptCommand,
        context: &OperationContext,
    ) -> AppResult<AcceptResult> {
        let now = Utc::now();
        let actor = context.actor_name();
        let mut tx = self.store.begin().await?;

        let (offer, request) = tx.find_offer_by_id_with_request(command.offer_id).await?;
        ensure_owner(context, &request)?;
        if offer.flow_type != FlowType::Online {
            return Err(DomainError::Forbidden(format!(
                "{} offer {} is confirmed by an admin",
                offer.flow_type, offer.id
            ))
            .into());
        }
        if offer.is_expired_at(now) {
            return Err(DomainError::OfferExpired { offer_id: offer.id }.into());
        }

        let mut accept = self
            .lock_for_accept(
                &mut tx,
                offer.id,
                command.interest_id,
                InterestStatus::CreatingLoanPackage,
            )
            .await?;

        tx.update_interest_status(&[accept.interest.id], InterestStatus::CreatingLoanPackage, now)
            .await?;
        let (cancelled_siblings, cancelled_other_offers) = cascade_alternatives(
            &mut tx,
            &accept.request,
            accept.offer.id,
            &actor,
            now,
        )
        .await?;
        tx.update_request_status_by_id(accept.request.id, RequestStatus::Confirmed, now)
            .await?;
        tx.commit().await?;

        accept.interest.status = InterestStatus::CreatingLoanPackage;
        accept.interest.updated_at = now;

        tracing::info!(
            request_id = accept.request.id,
            offer_id = accept.offer.id,
            interest_id = accept.interest.id,
            cancelled_siblings,
            cancelled_other_offers,
            actor = %actor,
            "Offer accepted by investor"
        );

        let dispatch_error = self.dispatch(confirmed_event(&accept, None)).await;

        Ok(AcceptResult {
            request_id: accept.request.id,
            offer_id: accept.offer.id,
            interest: accept.interest,
            contract: None,
            cancelled_siblings,
            cancelled_other_offers,
            dispatch_error,
        })
    }

    /// CREATING_LOAN_PACKAGE -> PACKAGE_CREATED, writing the line's contract.
    pub async fn mark_package_created(
        &self,
        interest_id: i64,
        context: &OperationContext,
    ) -> AppResult<PackageCreatedResult> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let line = tx.find_interest_by_id(interest_id).await?;
        let (offer, request) = tx.find_offer_by_id_with_request(line.offer_id).await?;
        let locked = tx.get_interests_by_offer_id_with_lock(offer.id).await?;
        let mut interest = find_line(locked, interest_id)?;

        ensure_transition(interest.status, InterestStatus::PackageCreated, offer.flow_type)?;
        if let Some(existing) = tx.find_contract_by_interest_id(interest.id).await? {
            return Err(DomainError::validation(format!(
                "contract {} already exists for interest {}",
                existing.id, interest.id
            ))
            .into());
        }

        tx.update_interest_status(&[interest.id], InterestStatus::PackageCreated, now)
            .await?;
        let contract = tx
            .create_contract(NewLoanContract::for_line(&request, &interest), now)
            .await?;
        tx.attach_contract(interest.id, contract.id, now).await?;
        tx.commit().await?;

        interest.status = InterestStatus::PackageCreated;
        interest.contract_id = Some(contract.id);
        interest.updated_at = now;

        tracing::info!(
            request_id = request.id,
            interest_id = interest.id,
            contract_id = contract.id,
            actor = %context.actor_name(),
            "Loan package created"
        );

        Ok(PackageCreatedResult { interest, contract })
    }

    pub async fn update_guarantee_end(
        &self,
        contract_id: i64,
        guarantee_ended_at: DateTime<Utc>,
        context: &OperationContext,
    ) -> AppResult<LoanContract> {
        let mut tx = self.store.begin().await?;
        let contract = tx.get_contract_by_id(contract_id).await?;
        if guarantee_ended_at < contract.created_at {
            return Err(DomainError::validation(
                "guarantee end must not precede contract creation",
            )
            .into());
        }

        let contract = tx.update_guarantee_end(contract_id, guarantee_ended_at).await?;
        tx.commit().await?;

        tracing::info!(
            contract_id,
            guarantee_ended_at = %guarantee_ended_at,
            actor = %context.actor_name(),
            "Contract guarantee end updated"
        );
        Ok(contract)
    }

    /// Lock the request and then the offer's lines, both `NoWait`, and check
    /// that `interest_id` may move to `to`.
    async fn lock_for_accept(
        &self,
        tx: &mut S::Tx,
        offer_id: i64,
        interest_id: i64,
        to: InterestStatus,
    ) -> AppResult<LockedAccept> {
        let (offer, request) = tx.find_offer_by_id_with_request(offer_id).await?;
        let request = tx.lock_request_by_id(request.id, LockMode::NoWait).await?;
        let lines = tx.get_interests_by_offer_id_with_lock(offer.id).await?;
        let interest = find_line(lines, interest_id)?;

        ensure_transition(interest.status, to, offer.flow_type)?;
        request.ensure_pending()?;

        Ok(LockedAccept {
            request,
            offer,
            interest,
        })
    }
}

struct LockedAccept {
    request: LoanPackageRequest,
    offer: LoanPackageOffer,
    interest: LoanPackageOfferInterest,
}

/// Cancel the accepted offer's siblings, then every other open line on the request.
async fn cascade_alternatives<T: StoreTx>(
    tx: &mut T,
    request: &LoanPackageRequest,
    offer_id: i64,
    actor: &str,
    now: DateTime<Utc>,
) -> AppResult<(u64, u64)> {
    let siblings = tx
        .cancel_by_offer_id(offer_id, actor, CancelledReason::AlternativeOption, now)
        .await?;
    let others = tx
        .cancel_pending_by_request_ids(&[request.id], actor, CancelledReason::AlternativeOption, now)
        .await?;
    Ok((siblings, others))
}

fn find_line(
    lines: Vec<LoanPackageOfferInterest>,
    interest_id: i64,
) -> AppResult<LoanPackageOfferInterest> {
    lines
        .into_iter()
        .find(|l| l.id == interest_id)
        .ok_or(AppError::NotFound {
            entity: "offer interest",
            id: interest_id,
        })
}

fn confirmed_event(accept: &LockedAccept, contract: Option<&LoanContract>) -> LoanEvent {
    LoanEvent::RequestConfirmed {
        request_id: accept.request.id,
        investor_id: accept.request.investor_id,
        account_no: accept.request.account_no.clone(),
        symbol_id: accept.request.symbol_id,
        interest_id: accept.interest.id,
        contract_id: contract.map(|c| c.id),
    }
}
