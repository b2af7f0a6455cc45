//! loan_broker Library
//!
//! Loan package lifecycle engine: requests, offers, interest lines and
//! contracts, with the confirmation workflow and the batch jobs that expire
//! offers and decline over-limit requests.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod notification;
pub mod store;
pub mod workflow;

pub use config::Config;
pub use domain::{DomainError, OperationContext};
pub use error::{AppError, AppResult};
pub use workflow::ConfirmationWorkflow;
