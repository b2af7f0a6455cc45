//! Domain module
//!
//! Entities, closed status enums, the interest state machine and the
//! derived-status reduction. Nothing in here touches storage.

pub mod combined;
pub mod context;
pub mod entities;
pub mod error;
pub mod filter;
pub mod status;
pub mod transition;

pub use combined::{derive_combined_status, CombinedLoanRequest, CombinedStatus};
pub use context::{Actor, OperationContext};
pub use entities::*;
pub use error::DomainError;
pub use filter::{Filter, Page, RequestFilter};
pub use status::{
    AssetType, CancelledReason, FlowType, InterestStatus, RequestStatus, RequestType,
    SchedulerJobStatus, SchedulerJobType,
};
