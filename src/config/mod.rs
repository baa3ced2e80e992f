//! Configuration loading for the sync engine.
//!
//! Loads a `.env` file plus environment variables prefixed with
//! `ISSUESYNC_`, producing a typed [`AppConfig`]. Every section has serde
//! defaults so an empty environment yields a runnable configuration, and
//! `validate()` enforces the bounds the engine relies on.

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `ISSUESYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub http: HttpClientConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryPolicyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub sync: SyncLimitsConfig,
}

/// Outbound HTTP client parameters shared by all remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_http_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Connection pool bound per remote host.
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

/// Scheduler-specific configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Upper bound on sync runs in flight at once.
    #[serde(default = "default_scheduler_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Wall-clock budget for a single run, in seconds.
    #[serde(default = "default_scheduler_max_run_seconds")]
    pub max_run_seconds: u64,
    /// Age without heartbeat after which a claim is considered stale.
    #[serde(default = "default_scheduler_stale_claim_seconds")]
    pub stale_claim_seconds: u64,
    /// Minimum proportional jitter applied to `next_sync_at`.
    #[serde(default = "default_scheduler_jitter_pct_min")]
    pub jitter_pct_min: f64,
    /// Maximum proportional jitter applied to `next_sync_at`.
    #[serde(default = "default_scheduler_jitter_pct_max")]
    pub jitter_pct_max: f64,
}

/// Retry policy for transient remote failures inside the client facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Starting backoff in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Proportional jitter factor, 0.0-1.0.
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

/// Sliding-window throttle applied per remote destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests permitted per window per destination.
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: usize,
    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub window_seconds: u64,
}

/// Circuit breaker thresholds, applied per remote instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    #[serde(default = "default_breaker_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an OPEN breaker waits before probing (HALF_OPEN).
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Consecutive HALF_OPEN successes required to close.
    #[serde(default = "default_breaker_success_threshold")]
    pub success_threshold: u32,
}

/// Attachment transfer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Download size ceiling in bytes.
    #[serde(default = "default_attachment_max_bytes")]
    pub max_bytes: u64,
    /// Redirect hops followed per download; each hop is re-validated.
    #[serde(default = "default_attachment_max_redirects")]
    pub max_redirects: u32,
    /// Permit downloads from private address ranges (self-hosted instances
    /// on internal networks). Link-local and metadata addresses stay
    /// rejected regardless.
    #[serde(default)]
    pub allow_private_networks: bool,
}

/// Bounds on per-config sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLimitsConfig {
    /// Smallest allowed sync interval in minutes.
    #[serde(default = "default_sync_min_interval_minutes")]
    pub min_interval_minutes: u32,
    /// Largest allowed sync interval in minutes.
    #[serde(default = "default_sync_max_interval_minutes")]
    pub max_interval_minutes: u32,
    /// Page size used when listing issues and notes.
    #[serde(default = "default_sync_page_size")]
    pub page_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            http: HttpClientConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            attachments: AttachmentConfig::default(),
            sync: SyncLimitsConfig::default(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_http_request_timeout_seconds(),
            connect_timeout_seconds: default_http_connect_timeout_seconds(),
            pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            max_concurrent_runs: default_scheduler_max_concurrent_runs(),
            max_run_seconds: default_scheduler_max_run_seconds(),
            stale_claim_seconds: default_scheduler_stale_claim_seconds(),
            jitter_pct_min: default_scheduler_jitter_pct_min(),
            jitter_pct_max: default_scheduler_jitter_pct_max(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_seconds: default_rate_limit_window_seconds(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failure_threshold(),
            cooldown_seconds: default_breaker_cooldown_seconds(),
            success_threshold: default_breaker_success_threshold(),
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_attachment_max_bytes(),
            max_redirects: default_attachment_max_redirects(),
            allow_private_networks: false,
        }
    }
}

impl Default for SyncLimitsConfig {
    fn default() -> Self {
        Self {
            min_interval_minutes: default_sync_min_interval_minutes(),
            max_interval_minutes: default_sync_max_interval_minutes(),
            page_size: default_sync_page_size(),
        }
    }
}

impl AppConfig {
    /// Validates the configuration, returning the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        if !(10..=300).contains(&scheduler.tick_interval_seconds) {
            return Err(ConfigError::InvalidTickInterval {
                value: scheduler.tick_interval_seconds,
            });
        }
        if scheduler.max_concurrent_runs == 0 || scheduler.max_concurrent_runs > 64 {
            return Err(ConfigError::InvalidConcurrency {
                value: scheduler.max_concurrent_runs,
            });
        }
        if scheduler.max_run_seconds < 60 {
            return Err(ConfigError::InvalidMaxRunSeconds {
                value: scheduler.max_run_seconds,
            });
        }
        if scheduler.stale_claim_seconds < scheduler.max_run_seconds {
            return Err(ConfigError::InvalidStaleClaimSeconds {
                value: scheduler.stale_claim_seconds,
                min_allowed: scheduler.max_run_seconds,
            });
        }
        if scheduler.jitter_pct_min < 0.0
            || scheduler.jitter_pct_max > 1.0
            || scheduler.jitter_pct_min > scheduler.jitter_pct_max
        {
            return Err(ConfigError::InvalidJitterRange {
                min: scheduler.jitter_pct_min,
                max: scheduler.jitter_pct_max,
            });
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 || retry.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: retry.max_attempts,
            });
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: retry.base_delay_ms,
                max: retry.max_delay_ms,
            });
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: retry.jitter_factor,
            });
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidRateLimitRequests);
        }
        if !(1..=3600).contains(&self.rate_limit.window_seconds) {
            return Err(ConfigError::InvalidRateLimitWindow {
                value: self.rate_limit.window_seconds,
            });
        }

        let breaker = &self.breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidBreakerThresholds {
                failures: breaker.failure_threshold,
                successes: breaker.success_threshold,
            });
        }

        if self.attachments.max_bytes == 0 {
            return Err(ConfigError::InvalidAttachmentCeiling);
        }
        if self.attachments.max_redirects > 10 {
            return Err(ConfigError::InvalidRedirectLimit {
                value: self.attachments.max_redirects,
            });
        }

        let sync = &self.sync;
        if sync.min_interval_minutes < 5
            || sync.max_interval_minutes > 1440
            || sync.min_interval_minutes > sync.max_interval_minutes
        {
            return Err(ConfigError::InvalidIntervalBounds {
                min: sync.min_interval_minutes,
                max: sync.max_interval_minutes,
            });
        }
        if sync.page_size == 0 || sync.page_size > 100 {
            return Err(ConfigError::InvalidPageSize {
                value: sync.page_size,
            });
        }

        Ok(())
    }

    /// Clamps a requested per-config interval into the configured bounds.
    pub fn clamp_interval_minutes(&self, requested: u32) -> u32 {
        requested.clamp(
            self.sync.min_interval_minutes,
            self.sync.max_interval_minutes,
        )
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("scheduler tick interval must be between 10 and 300 seconds, got {value}")]
    InvalidTickInterval { value: u64 },
    #[error("max concurrent runs must be between 1 and 64, got {value}")]
    InvalidConcurrency { value: usize },
    #[error("max run seconds must be at least 60, got {value}")]
    InvalidMaxRunSeconds { value: u64 },
    #[error("stale claim seconds must be at least max run seconds ({min_allowed}), got {value}")]
    InvalidStaleClaimSeconds { value: u64, min_allowed: u64 },
    #[error("scheduler jitter percentages out of bounds (min: {min}, max: {max})")]
    InvalidJitterRange { min: f64, max: f64 },
    #[error("retry attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("retry base delay ({base}ms) cannot exceed max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("rate limit must permit at least one request per window")]
    InvalidRateLimitRequests,
    #[error("rate limit window must be between 1 and 3600 seconds, got {value}")]
    InvalidRateLimitWindow { value: u64 },
    #[error("breaker thresholds must be positive (failures: {failures}, successes: {successes})")]
    InvalidBreakerThresholds { failures: u32, successes: u32 },
    #[error("attachment size ceiling must be positive")]
    InvalidAttachmentCeiling,
    #[error("attachment redirect limit must not exceed 10, got {value}")]
    InvalidRedirectLimit { value: u32 },
    #[error("sync interval bounds must lie within 5-1440 minutes (min: {min}, max: {max})")]
    InvalidIntervalBounds { min: u32, max: u32 },
    #[error("issue page size must be between 1 and 100, got {value}")]
    InvalidPageSize { value: u32 },
}

/// Loads configuration from an optional `.env` file and `ISSUESYNC_*` vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, overlays the process environment, and validates.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = self.collect_env_file()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("ISSUESYNC_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let config = Self::from_map(layered);
        config.validate()?;
        Ok(config)
    }

    fn collect_env_file(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut values = BTreeMap::new();
        let path = self.base_dir.join(".env");
        if path.exists() {
            let iter = dotenvy::from_path_iter(&path).map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            for entry in iter {
                let (key, value) = entry.map_err(|source| ConfigError::EnvFile {
                    path: path.clone(),
                    source,
                })?;
                if let Some(stripped) = key.strip_prefix("ISSUESYNC_") {
                    values.insert(stripped.to_string(), value);
                }
            }
        }
        Ok(values)
    }

    fn from_map(mut layered: BTreeMap<String, String>) -> AppConfig {
        let mut config = AppConfig::default();

        fn take<T: std::str::FromStr>(
            layered: &mut BTreeMap<String, String>,
            key: &str,
            slot: &mut T,
        ) {
            if let Some(parsed) = layered.remove(key).and_then(|v| v.parse().ok()) {
                *slot = parsed;
            }
        }

        take(&mut layered, "LOG_LEVEL", &mut config.log_level);
        take(&mut layered, "LOG_FORMAT", &mut config.log_format);
        take(
            &mut layered,
            "HTTP_REQUEST_TIMEOUT_SECONDS",
            &mut config.http.request_timeout_seconds,
        );
        take(
            &mut layered,
            "HTTP_CONNECT_TIMEOUT_SECONDS",
            &mut config.http.connect_timeout_seconds,
        );
        take(
            &mut layered,
            "HTTP_POOL_MAX_IDLE_PER_HOST",
            &mut config.http.pool_max_idle_per_host,
        );
        take(
            &mut layered,
            "SCHEDULER_TICK_INTERVAL_SECONDS",
            &mut config.scheduler.tick_interval_seconds,
        );
        take(
            &mut layered,
            "SCHEDULER_MAX_CONCURRENT_RUNS",
            &mut config.scheduler.max_concurrent_runs,
        );
        take(
            &mut layered,
            "SCHEDULER_MAX_RUN_SECONDS",
            &mut config.scheduler.max_run_seconds,
        );
        take(
            &mut layered,
            "SCHEDULER_STALE_CLAIM_SECONDS",
            &mut config.scheduler.stale_claim_seconds,
        );
        take(
            &mut layered,
            "SCHEDULER_JITTER_PCT_MIN",
            &mut config.scheduler.jitter_pct_min,
        );
        take(
            &mut layered,
            "SCHEDULER_JITTER_PCT_MAX",
            &mut config.scheduler.jitter_pct_max,
        );
        take(
            &mut layered,
            "RETRY_MAX_ATTEMPTS",
            &mut config.retry.max_attempts,
        );
        take(
            &mut layered,
            "RETRY_BASE_DELAY_MS",
            &mut config.retry.base_delay_ms,
        );
        take(
            &mut layered,
            "RETRY_MAX_DELAY_MS",
            &mut config.retry.max_delay_ms,
        );
        take(
            &mut layered,
            "RETRY_JITTER_FACTOR",
            &mut config.retry.jitter_factor,
        );
        take(
            &mut layered,
            "RATE_LIMIT_MAX_REQUESTS",
            &mut config.rate_limit.max_requests,
        );
        take(
            &mut layered,
            "RATE_LIMIT_WINDOW_SECONDS",
            &mut config.rate_limit.window_seconds,
        );
        take(
            &mut layered,
            "BREAKER_FAILURE_THRESHOLD",
            &mut config.breaker.failure_threshold,
        );
        take(
            &mut layered,
            "BREAKER_COOLDOWN_SECONDS",
            &mut config.breaker.cooldown_seconds,
        );
        take(
            &mut layered,
            "BREAKER_SUCCESS_THRESHOLD",
            &mut config.breaker.success_threshold,
        );
        take(
            &mut layered,
            "ATTACHMENT_MAX_BYTES",
            &mut config.attachments.max_bytes,
        );
        take(
            &mut layered,
            "ATTACHMENT_MAX_REDIRECTS",
            &mut config.attachments.max_redirects,
        );
        take(
            &mut layered,
            "ATTACHMENT_ALLOW_PRIVATE_NETWORKS",
            &mut config.attachments.allow_private_networks,
        );
        take(
            &mut layered,
            "SYNC_MIN_INTERVAL_MINUTES",
            &mut config.sync.min_interval_minutes,
        );
        take(
            &mut layered,
            "SYNC_MAX_INTERVAL_MINUTES",
            &mut config.sync.max_interval_minutes,
        );
        take(&mut layered, "SYNC_PAGE_SIZE", &mut config.sync.page_size);

        config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_http_request_timeout_seconds() -> u64 {
    30
}

fn default_http_connect_timeout_seconds() -> u64 {
    10
}

fn default_http_pool_max_idle_per_host() -> usize {
    8
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    60 // 1 minute
}

fn default_scheduler_max_concurrent_runs() -> usize {
    4
}

fn default_scheduler_max_run_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_scheduler_stale_claim_seconds() -> u64 {
    3600 // 1 hour
}

fn default_scheduler_jitter_pct_min() -> f64 {
    0.0
}

fn default_scheduler_jitter_pct_max() -> f64 {
    0.1 // 10% maximum jitter
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_jitter_factor() -> f64 {
    0.1
}

fn default_rate_limit_max_requests() -> usize {
    60
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_seconds() -> u64 {
    60
}

fn default_breaker_success_threshold() -> u32 {
    3
}

fn default_attachment_max_bytes() -> u64 {
    25 * 1024 * 1024 // 25 MiB
}

fn default_attachment_max_redirects() -> u32 {
    3
}

fn default_sync_min_interval_minutes() -> u32 {
    5
}

fn default_sync_max_interval_minutes() -> u32 {
    1440 // 24 hours
}

fn default_sync_page_size() -> u32 {
    100
}
