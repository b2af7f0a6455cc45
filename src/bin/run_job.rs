//! One-shot job trigger
//!
//! Run with: cargo run --bin run_job -- <expire-offers|decline-high-rate>
//!
//! Runs one scheduler pass and exits. A failed pass is recorded as a FAIL
//! job row and still exits 0; only a process that cannot start fails.

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loan_broker::jobs::{ExpirationScheduler, JobReport, RiskDeclineScheduler};
use loan_broker::store::PgStore;
use loan_broker::{db, Config};

enum Job {
    ExpireOffers,
    DeclineHighRate,
}

impl Job {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "expire-offers" => Some(Job::ExpireOffers),
            "decline-high-rate" => Some(Job::DeclineHighRate),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loan_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1).unwrap_or_default();
    let job = Job::parse(&arg).ok_or_else(|| {
        anyhow::anyhow!("usage: run_job <expire-offers|decline-high-rate>, got {:?}", arg)
    })?;

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    if !db::check_schema(&pool).await? {
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    let store = PgStore::new(pool.clone());
    let report: JobReport = match job {
        Job::ExpireOffers => {
            ExpirationScheduler::new(store, config.system_actor.clone())
                .run()
                .await
        }
        Job::DeclineHighRate => {
            RiskDeclineScheduler::new(store, config.system_actor.clone())
                .with_batch_size(config.risk_decline_batch_size)
                .run()
                .await
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    pool.close().await;
    Ok(())
}
