//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::{middleware::from_fn, Router};

use crate::jobs::JobScheduler;
use crate::store::Store;
use crate::workflow::ConfirmationWorkflow;

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState<S: Store> {
    pub workflow: Arc<ConfirmationWorkflow<S>>,
    pub jobs: Arc<JobScheduler<S>>,
}

impl<S: Store> AppState<S> {
    pub fn new(workflow: Arc<ConfirmationWorkflow<S>>, jobs: Arc<JobScheduler<S>>) -> Self {
        Self { workflow, jobs }
    }
}

/// The `/api/v1` router with context and logging middleware applied.
///
/// Layers run outermost first: the context is built before the logger
/// reads it.
pub fn api_router<S: Store>(state: AppState<S>) -> Router {
    create_router::<S>()
        .layer(from_fn(middleware::logging_middleware))
        .layer(from_fn(middleware::context_middleware))
        .with_state(state)
}
