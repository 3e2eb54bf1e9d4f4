use service_core::config::{self as core_config, env_or, env_parse};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::services::MatchingPolicy;

/// Backoff never grows past this, however many attempts a job has used.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BillingLedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub jobs: JobConfig,
    pub matching: MatchingPolicy,
    pub penalty_policy_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_size: 256,
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl JobConfig {
    /// Delay before the next attempt: the base backoff doubled for every
    /// attempt already made, capped at 30s.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_RETRY_BACKOFF)
    }
}

impl BillingLedgerConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;

        let defaults = JobConfig::default();
        let jobs = JobConfig {
            worker_count: env_parse("JOB_WORKER_COUNT", defaults.worker_count)?.max(1),
            queue_size: env_parse("JOB_QUEUE_SIZE", defaults.queue_size)?.max(1),
            max_attempts: env_parse("JOB_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            attempt_timeout: Duration::from_secs(env_parse(
                "JOB_ATTEMPT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?),
            retry_backoff: Duration::from_millis(env_parse(
                "JOB_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
        };

        let policy = MatchingPolicy::default();
        let matching = MatchingPolicy::new(
            env_parse("MATCH_THRESHOLD", policy.match_threshold)?,
            env_parse("AMBIGUOUS_THRESHOLD", policy.ambiguous_threshold)?,
        )
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "billing-ledger-service"),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            jobs,
            matching,
            penalty_policy_version: env_or("PENALTY_POLICY_VERSION", "daily-v1"),
        })
    }

    /// Defaults for everything except the common settings.
    pub fn with_common(common: core_config::Config) -> Self {
        Self {
            common,
            service_name: "billing-ledger-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            jobs: JobConfig::default(),
            matching: MatchingPolicy::default(),
            penalty_policy_version: "daily-v1".to_string(),
        }
    }
}
