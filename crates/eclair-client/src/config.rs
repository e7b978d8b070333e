//! Core configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can start with zero
//! configuration; hosts usually build a [`CoreConfig`] with
//! [`CoreConfig::from_env`] and override a few fields in code.

use std::path::PathBuf;
use std::time::Duration;

use eclair_shared::constants::{
    DEFAULT_BUFFER_WINDOW_MS, DEFAULT_CACHE_TTL_MS, DEFAULT_DEDUP_WINDOW_SECS,
    DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_MS,
    DEFAULT_RETRY_JITTER, DEFAULT_RETRY_MAX_MS, DEFAULT_TOKEN_RETRY_DELAYS_MS,
    DEFAULT_TOKEN_REVALIDATE_SECS, DEFAULT_UPLOAD_CONCURRENCY, MAX_UPLOAD_CONCURRENCY,
};

use crate::retry::RetryPolicy;

/// Delivery core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the backend HTTP API.
    /// Env: `ECLAIR_BACKEND_URL`
    /// Default: `http://127.0.0.1:8080`
    pub backend_url: String,

    /// Directory holding `eclair.db`.  `None` means the platform data dir.
    /// Env: `ECLAIR_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Number of messages that may upload concurrently (clamped to 1..=3).
    /// Env: `ECLAIR_UPLOAD_CONCURRENCY`
    /// Default: `2`
    pub upload_concurrency: usize,

    /// First retry delay after a transient delivery failure.
    /// Env: `ECLAIR_RETRY_BASE_MS`
    /// Default: `2000`
    pub retry_base_ms: u64,

    /// Ceiling of any retry delay.
    /// Env: `ECLAIR_RETRY_MAX_MS`
    /// Default: `60000`
    pub retry_max_ms: u64,

    /// Failed attempts before a message becomes `failedTerminal`.
    /// Env: `ECLAIR_MAX_ATTEMPTS`
    /// Default: `5`
    pub max_attempts: u32,

    /// Largest fraction shaved off a retry delay (0 disables jitter).
    /// Env: `ECLAIR_RETRY_JITTER`
    /// Default: `0.25`
    pub retry_jitter: f64,

    /// Waits between push token regeneration attempts.
    /// Env: `ECLAIR_TOKEN_RETRY_DELAYS_MS` (comma separated)
    /// Default: `2000,5000,10000`
    pub token_retry_delays_ms: Vec<u64>,

    /// Period of the notification health check (at least one second).
    /// Env: `ECLAIR_HEALTH_INTERVAL_SECS`
    /// Default: `1800`
    pub health_interval_secs: u64,

    /// Window in which messages of one sender are grouped.
    /// Env: `ECLAIR_BUFFER_WINDOW_MS`
    /// Default: `2000`
    pub buffer_window_ms: u64,

    /// Lifetime of an "immediate notification sent" marker.
    /// Env: `ECLAIR_DEDUP_WINDOW_SECS`
    /// Default: `120`
    pub dedup_window_secs: u64,

    /// Default TTL of cache snapshots.
    /// Env: `ECLAIR_CACHE_TTL_MS`
    /// Default: `300000`
    pub cache_ttl_ms: u64,

    /// A validated token younger than this skips the probe in health checks.
    /// Env: `ECLAIR_TOKEN_REVALIDATE_SECS`
    /// Default: `86400`
    pub token_revalidate_secs: u64,

    /// Per-request timeout of the HTTP transport.
    /// Env: `ECLAIR_HTTP_TIMEOUT_SECS`
    /// Default: `30`
    pub http_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".to_string(),
            data_dir: None,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_jitter: DEFAULT_RETRY_JITTER,
            token_retry_delays_ms: DEFAULT_TOKEN_RETRY_DELAYS_MS.to_vec(),
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            buffer_window_ms: DEFAULT_BUFFER_WINDOW_MS,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            token_revalidate_secs: DEFAULT_TOKEN_REVALIDATE_SECS,
            http_timeout_secs: 30,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ECLAIR_BACKEND_URL") {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Some(dir) = lookup("ECLAIR_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        parse_into(&lookup, "ECLAIR_UPLOAD_CONCURRENCY", &mut config.upload_concurrency);
        parse_into(&lookup, "ECLAIR_RETRY_BASE_MS", &mut config.retry_base_ms);
        parse_into(&lookup, "ECLAIR_RETRY_MAX_MS", &mut config.retry_max_ms);
        parse_into(&lookup, "ECLAIR_MAX_ATTEMPTS", &mut config.max_attempts);
        parse_into(&lookup, "ECLAIR_RETRY_JITTER", &mut config.retry_jitter);
        parse_into(&lookup, "ECLAIR_HEALTH_INTERVAL_SECS", &mut config.health_interval_secs);
        parse_into(&lookup, "ECLAIR_BUFFER_WINDOW_MS", &mut config.buffer_window_ms);
        parse_into(&lookup, "ECLAIR_DEDUP_WINDOW_SECS", &mut config.dedup_window_secs);
        parse_into(&lookup, "ECLAIR_CACHE_TTL_MS", &mut config.cache_ttl_ms);
        parse_into(&lookup, "ECLAIR_TOKEN_REVALIDATE_SECS", &mut config.token_revalidate_secs);
        parse_into(&lookup, "ECLAIR_HTTP_TIMEOUT_SECS", &mut config.http_timeout_secs);

        if let Some(list) = lookup("ECLAIR_TOKEN_RETRY_DELAYS_MS") {
            match parse_delay_list(&list) {
                Ok(delays) => config.token_retry_delays_ms = delays,
                Err(e) => {
                    tracing::warn!(
                        value = %list,
                        error = %e,
                        "Invalid ECLAIR_TOKEN_RETRY_DELAYS_MS, using default"
                    );
                }
            }
        }

        config.normalize()
    }

    /// Clamp fields into their supported ranges.
    pub fn normalize(mut self) -> Self {
        self.upload_concurrency = self.upload_concurrency.clamp(1, MAX_UPLOAD_CONCURRENCY);
        self.retry_jitter = self.retry_jitter.clamp(0.0, 1.0);
        self.max_attempts = self.max_attempts.max(1);
        self.health_interval_secs = self.health_interval_secs.max(1);
        if self.retry_max_ms < self.retry_base_ms {
            self.retry_max_ms = self.retry_base_ms;
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_ms, self.retry_max_ms)
            .with_max_attempts(self.max_attempts)
            .with_jitter(self.retry_jitter)
    }

    pub fn token_retry_delays(&self) -> Vec<Duration> {
        self.token_retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn buffer_window(&self) -> Duration {
        Duration::from_millis(self.buffer_window_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
        }
    }
}

/// Parse `"2000, 5000,10000"` into milliseconds.
fn parse_delay_list(list: &str) -> Result<Vec<u64>, String> {
    let delays = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|e| format!("{s:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    if delays.is_empty() {
        return Err("empty delay list".to_string());
    }
    Ok(delays)
}
