use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use uuid::Uuid;

use crate::article::{RetryConfig, Stage};
use crate::error::AppError;

/// Pipeline-wide settings shared by every stage worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Relevance probability above which an article is labeled relevant.
    pub relevance_threshold: f64,
    /// Sleep when a stage queue is empty.
    pub poll_interval: Duration,
    /// Sleep after a claim or commit error.
    pub error_backoff: Duration,
    pub retry: RetryConfig,
    /// How long a claim protects an article before another worker may take it.
    pub claim_lease: TimeDelta,
    pub session_refresh: Duration,
    /// Download errors younger than this are requeued once by the sweep.
    pub download_retry_window: TimeDelta,
    pub sweep_interval: Duration,
    pub synonyms_dir: PathBuf,
    /// Holds `common_descriptions.txt` and `common_lines.txt`.
    pub boilerplate_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.42,
            poll_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            retry: RetryConfig::default(),
            claim_lease: TimeDelta::minutes(30),
            session_refresh: Duration::from_secs(12 * 60 * 60),
            download_retry_window: TimeDelta::days(3),
            sweep_interval: Duration::from_secs(6 * 60 * 60),
            synonyms_dir: PathBuf::from("data"),
            boilerplate_dir: PathBuf::from("data"),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}'"))
        }),
    }
}

impl PipelineConfig {
    /// Read configuration from `KMDB_*` environment variables, falling back
    /// to defaults for unset ones.
    ///
    /// - `KMDB_RELEVANCE_THRESHOLD` (0.42)
    /// - `KMDB_POLL_INTERVAL_SECS` (30)
    /// - `KMDB_ERROR_BACKOFF_SECS` (60)
    /// - `KMDB_MAX_RETRIES` (3)
    /// - `KMDB_CLAIM_LEASE_SECS` (1800)
    /// - `KMDB_SESSION_REFRESH_SECS` (43200)
    /// - `KMDB_DOWNLOAD_RETRY_WINDOW_DAYS` (3)
    /// - `KMDB_SWEEP_INTERVAL_SECS` (21600)
    /// - `KMDB_SYNONYMS_DIR` (`data`)
    /// - `KMDB_BOILERPLATE_DIR` (`data`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let d = Self::default();

        let relevance_threshold: f64 =
            parse_var(&lookup, "KMDB_RELEVANCE_THRESHOLD", d.relevance_threshold)?;
        if !(0.0..=1.0).contains(&relevance_threshold) {
            return Err(AppError::ConfigError(format!(
                "KMDB_RELEVANCE_THRESHOLD must be within [0, 1], got {relevance_threshold}"
            )));
        }

        let secs = |name: &str, default: Duration| -> Result<Duration, AppError> {
            parse_var(&lookup, name, default.as_secs()).map(Duration::from_secs)
        };

        let claim_lease_secs: i64 =
            parse_var(&lookup, "KMDB_CLAIM_LEASE_SECS", d.claim_lease.num_seconds())?;
        let window_days: i64 = parse_var(
            &lookup,
            "KMDB_DOWNLOAD_RETRY_WINDOW_DAYS",
            d.download_retry_window.num_days(),
        )?;
        if claim_lease_secs <= 0 || window_days < 0 {
            return Err(AppError::ConfigError(
                "KMDB_CLAIM_LEASE_SECS must be positive and KMDB_DOWNLOAD_RETRY_WINDOW_DAYS non-negative"
                    .into(),
            ));
        }

        Ok(Self {
            relevance_threshold,
            poll_interval: secs("KMDB_POLL_INTERVAL_SECS", d.poll_interval)?,
            error_backoff: secs("KMDB_ERROR_BACKOFF_SECS", d.error_backoff)?,
            retry: RetryConfig {
                max_retries: parse_var(&lookup, "KMDB_MAX_RETRIES", d.retry.max_retries)?,
                ..d.retry
            },
            claim_lease: TimeDelta::seconds(claim_lease_secs),
            session_refresh: secs("KMDB_SESSION_REFRESH_SECS", d.session_refresh)?,
            download_retry_window: TimeDelta::days(window_days),
            sweep_interval: secs("KMDB_SWEEP_INTERVAL_SECS", d.sweep_interval)?,
            synonyms_dir: lookup("KMDB_SYNONYMS_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.synonyms_dir),
            boilerplate_dir: lookup("KMDB_BOILERPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.boilerplate_dir),
        })
    }
}

/// Configuration for one stage worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub claim_lease: TimeDelta,
    pub retry_config: RetryConfig,
}

impl WorkerConfig {
    pub fn for_stage(stage: Stage, pipeline: &PipelineConfig) -> Self {
        Self {
            worker_id: format!("{stage}-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: pipeline.poll_interval,
            error_backoff: pipeline.error_backoff,
            claim_lease: pipeline.claim_lease,
            retry_config: pipeline.retry.clone(),
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}
