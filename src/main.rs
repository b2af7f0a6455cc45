//! loan_broker - loan package lifecycle service
//!
//! Serves the confirmation workflow over HTTP and runs the offer expiration
//! and high loan-rate decline jobs in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loan_broker::api::{self, AppState};
use loan_broker::jobs::JobScheduler;
use loan_broker::notification::{LogNotifier, Notifier};
use loan_broker::store::PgStore;
use loan_broker::{db, Config, ConfirmationWorkflow};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loan_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState<PgStore>) -> Router {
    Router::new()
        // Health check (no identity headers)
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api::api_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting loan_broker server");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    let store = PgStore::new(pool.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let workflow = Arc::new(ConfirmationWorkflow::with_notifier(store.clone(), notifier.clone()));
    let jobs = Arc::new(
        JobScheduler::with_config(store, config.job_scheduler_config()).with_notifier(notifier),
    );

    let job_handle = if config.jobs_enabled {
        Some(Arc::clone(&jobs).start())
    } else {
        tracing::info!("Background jobs disabled");
        None
    };

    let app = build_router(AppState::new(workflow, jobs));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    if let Some(handle) = job_handle {
        handle.abort();
    }
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
