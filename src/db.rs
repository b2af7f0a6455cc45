//! Database module
//!
//! Connection and schema checks. The schema itself lives in raw SQL files
//! under migrations/.

use sqlx::PgPool;

/// Tables the lifecycle store reads and writes
pub const REQUIRED_TABLES: &[&str] = &[
    "loan_package_requests",
    "loan_package_offers",
    "loan_package_offer_interests",
    "loan_contracts",
    "submission_sheets",
    "loan_request_scheduler_configs",
    "scheduler_jobs",
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let mut missing = Vec::new();

    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            missing.push(*table);
        }
    }

    if !missing.is_empty() {
        tracing::error!(missing = ?missing, "Required tables do not exist");
        return Ok(false);
    }

    tracing::info!(tables = REQUIRED_TABLES.len(), "Database schema verified");
    Ok(true)
}
