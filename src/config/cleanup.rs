//! Cleanup policy configuration.
//!
//! Controls which intake tokens count as expired, how candidates are paged,
//! how transient failures are retried and which safety limits apply.
//!
//! # Example
//!
//! ```toml
//! [cleanup]
//! retention_days = 7
//! interval_hours = 24
//!
//! [cleanup.batch]
//! page_size = 500
//! max_attempts = 3
//! initial_backoff_ms = 200
//! max_backoff_ms = 5000
//!
//! [cleanup.safety]
//! dry_run = false
//! max_deletes_per_run = 100000
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    /// Tokens created more than this many days before the job's invocation
    /// time, and never completed, are expired.
    /// Default: 7
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the built-in worker loop runs a job (in hours).
    /// Only used by `intake-janitor worker`; an external scheduler calling
    /// `intake-janitor run` decides its own cadence.
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Paging and retry settings.
    #[serde(default)]
    pub batch: BatchSettings,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: CleanupSafety,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            interval_hours: default_interval_hours(),
            batch: BatchSettings::default(),
            safety: CleanupSafety::default(),
        }
    }
}

fn default_retention_days() -> u32 {
    7
}

fn default_interval_hours() -> u64 {
    24
}

/// Paging and per-page retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSettings {
    /// Maximum number of candidate tokens per page. Each page is deleted in
    /// one transaction.
    /// Default: 500
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Total attempts per page (initial attempt included) before a transient
    /// failure aborts the run.
    /// Default: 3
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the delay between retries in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random jitter applied to each delay (fraction, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_page_size() -> u32 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl BatchSettings {
    /// Calculate the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base_delay =
            (self.initial_backoff_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_backoff_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        std::time::Duration::from_millis(final_delay as u64)
    }
}

/// Safety settings for cleanup runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupSafety {
    /// If true, every page is deleted inside a transaction that is rolled
    /// back instead of committed, and the counts that would have been
    /// deleted are reported.
    ///
    /// Counts are per page. An entity whose expired tokens span several
    /// pages is only freed by its last token in a real run; in a dry run the
    /// earlier tokens are never removed, so it is reported as preserved and
    /// `entities_deleted` (and its corpus items) under-count.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Stop the run once this many tokens have been deleted. The remaining
    /// candidates are picked up by the next run.
    /// Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_deletes_per_run: u64,
}

impl CleanupConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_days == 0 {
            return Err(ConfigError::Validation(
                "cleanup.retention_days must be at least 1".into(),
            ));
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "cleanup.interval_hours must be at least 1".into(),
            ));
        }
        if self.batch.page_size == 0 {
            return Err(ConfigError::Validation(
                "cleanup.batch.page_size must be at least 1".into(),
            ));
        }
        if self.batch.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "cleanup.batch.max_attempts must be at least 1".into(),
            ));
        }
        if self.batch.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "cleanup.batch.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.batch.jitter) {
            return Err(ConfigError::Validation(
                "cleanup.batch.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// The expiry boundary for a job invoked at `invoked_at`.
    ///
    /// Truncated to milliseconds so it compares exactly against stored
    /// timestamps and encoded cursors.
    pub fn cutoff(&self, invoked_at: DateTime<Utc>) -> DateTime<Utc> {
        let cutoff = invoked_at - Duration::days(i64::from(self.retention_days));
        DateTime::from_timestamp_millis(cutoff.timestamp_millis()).unwrap_or(cutoff)
    }

    /// Get the worker interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours * 3600)
    }

    /// The delete cap as a plain limit (`u64::MAX` when unlimited).
    pub fn max_deletes(&self) -> u64 {
        if self.safety.max_deletes_per_run == 0 {
            u64::MAX
        } else {
            self.safety.max_deletes_per_run
        }
    }
}
