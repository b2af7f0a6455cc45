//! Notification module
//!
//! Outbound lifecycle events. Dispatch happens after the owning transaction
//! has committed, so a failed dispatch never undoes a transition.

use async_trait::async_trait;
use serde::Serialize;

/// Lifecycle event sent to the investor-facing notification service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoanEvent {
    RequestConfirmed {
        request_id: i64,
        investor_id: i64,
        account_no: String,
        symbol_id: i64,
        interest_id: i64,
        contract_id: Option<i64>,
    },
    OfferReady {
        request_id: i64,
        investor_id: i64,
        account_no: String,
        symbol_id: i64,
        offer_id: i64,
    },
    RequestDeclined {
        request_id: i64,
        investor_id: i64,
        account_no: String,
        symbol_id: i64,
        reason: crate::domain::CancelledReason,
    },
}

impl LoanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoanEvent::RequestConfirmed { .. } => "request_confirmed",
            LoanEvent::OfferReady { .. } => "offer_ready",
            LoanEvent::RequestDeclined { .. } => "request_declined",
        }
    }

    pub fn request_id(&self) -> i64 {
        match self {
            LoanEvent::RequestConfirmed { request_id, .. }
            | LoanEvent::OfferReady { request_id, .. }
            | LoanEvent::RequestDeclined { request_id, .. } => *request_id,
        }
    }
}

/// Errors from notification dispatch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification transport unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LoanEvent) -> NotifyResult<()>;
}

/// Writes every event to the log. Default notifier when no transport is wired.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &LoanEvent) -> NotifyResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| NotifyError::Rejected(e.to_string()))?;
        tracing::info!(
            event = event.name(),
            request_id = event.request_id(),
            payload = %payload,
            "Dispatching notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_ready() -> LoanEvent {
        LoanEvent::OfferReady {
            request_id: 1,
            investor_id: 2,
            account_no: "0001".to_string(),
            symbol_id: 3,
            offer_id: 4,
        }
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(offer_ready()).unwrap();
        assert_eq!(json["event"], "offer_ready");
        assert_eq!(json["offer_id"], 4);
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_every_event() {
        let notifier = LogNotifier;
        notifier.notify(&offer_ready()).await.unwrap();
        assert_eq!(offer_ready().name(), "offer_ready");
        assert_eq!(offer_ready().request_id(), 1);
    }
}
