//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::jobs::JobSchedulerConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Offer expiration period in seconds
    pub expiration_job_interval_secs: u64,

    /// High loan-rate decline period in seconds
    pub risk_decline_job_interval_secs: u64,

    /// Requests claimed per decline transaction
    pub risk_decline_batch_size: i64,

    /// Actor stamped on scheduler cancellations and job rows
    pub system_actor: String,

    /// Spawn the periodic job loop from the server
    pub jobs_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| env::var(name).ok())
    }

    /// Load configuration from any name -> value lookup
    pub fn from_source<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?;
        let host = get("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&get, "PORT", 3000)?;
        let environment = get("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let expiration_job_interval_secs = parse_or(&get, "EXPIRATION_JOB_INTERVAL_SECS", 60)?;
        let risk_decline_job_interval_secs =
            parse_or(&get, "RISK_DECLINE_JOB_INTERVAL_SECS", 300)?;
        if expiration_job_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("EXPIRATION_JOB_INTERVAL_SECS"));
        }
        if risk_decline_job_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("RISK_DECLINE_JOB_INTERVAL_SECS"));
        }

        let risk_decline_batch_size: i64 = parse_or(&get, "RISK_DECLINE_BATCH_SIZE", 200)?;
        if risk_decline_batch_size < 1 {
            return Err(ConfigError::InvalidValue("RISK_DECLINE_BATCH_SIZE"));
        }

        let system_actor = get("SYSTEM_ACTOR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "system".to_string());

        let jobs_enabled = match get("JOBS_ENABLED") {
            None => true,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidValue("JOBS_ENABLED")),
            },
        };

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            expiration_job_interval_secs,
            risk_decline_job_interval_secs,
            risk_decline_batch_size,
            system_actor,
            jobs_enabled,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn job_scheduler_config(&self) -> JobSchedulerConfig {
        JobSchedulerConfig {
            expiration_interval: Duration::from_secs(self.expiration_job_interval_secs),
            risk_decline_interval: Duration::from_secs(self.risk_decline_job_interval_secs),
            risk_decline_batch_size: self.risk_decline_batch_size,
            system_actor: self.system_actor.clone(),
        }
    }
}

fn parse_or<F, T>(get: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
