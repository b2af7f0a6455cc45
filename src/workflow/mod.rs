//! Confirmation workflow
//!
//! Orchestrates every lifecycle transition of requests, offers and interest
//! lines. Each mutating operation runs inside one store transaction and
//! commits once; notifications go out only after the commit.
//!
//! Accept and cancel paths lock the request row and then the offer's lines
//! with `NoWait`, so a concurrent caller fails fast with `OfferBusy` instead
//! of queueing behind the winner.

mod accept;
mod cancel;
mod commands;
mod offer;
mod request;
mod risk;

use std::sync::Arc;

use crate::domain::{DomainError, LoanPackageRequest, OperationContext};
use crate::error::AppResult;
use crate::notification::{LoanEvent, LogNotifier, Notifier};
use crate::store::Store;

pub use commands::*;

/// Lifecycle engine over a transactional store.
pub struct ConfirmationWorkflow<S: Store> {
    store: S,
    notifier: Arc<dyn Notifier>,
}

impl<S: Store> ConfirmationWorkflow<S> {
    pub fn new(store: S) -> Self {
        Self::with_notifier(store, Arc::new(LogNotifier))
    }

    pub fn with_notifier(store: S, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Dispatch after commit. Failure is logged and handed back, never raised.
    async fn dispatch(&self, event: LoanEvent) -> Option<String> {
        match self.notifier.notify(&event).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    event = event.name(),
                    request_id = event.request_id(),
                    error = %err,
                    "Notification dispatch failed"
                );
                Some(err.to_string())
            }
        }
    }
}

/// Investors may act only on their own requests; admins and system on any.
fn ensure_owner(context: &OperationContext, request: &LoanPackageRequest) -> AppResult<()> {
    ensure_investor_scope(context, request.investor_id)
}

fn ensure_investor_scope(context: &OperationContext, investor_id: i64) -> AppResult<()> {
    match context.actor.investor_id() {
        Some(actor_id) if actor_id != investor_id => Err(DomainError::Forbidden(format!(
            "investor {} cannot act for investor {}",
            actor_id, investor_id
        ))
        .into()),
        _ => Ok(()),
    }
}
