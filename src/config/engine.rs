use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_ms::{duration_ms, option_duration_ms};
use crate::error::KairosError;
use crate::quality::{QualityProfile, TimeoutSet};
use crate::race::RacePolicy;
use crate::retry::RetryPolicy;

/// Race settings. Unset values fall back to the quality-derived profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RaceConfig {
    /// Number of parallel attempts.
    /// TOML: `race.concurrency`. Falls back to the tier's concurrency.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Bound on each attempt (including its retries) before it counts as failed.
    /// TOML: `race.per_attempt_timeout_ms`. Falls back to connect + read timeouts of the tier.
    #[serde(rename = "per_attempt_timeout_ms", default, with = "option_duration_ms")]
    pub per_attempt_timeout: Option<Duration>,

    /// `await_all` (default) joins every attempt; `first_success` drops siblings on the first win.
    /// TOML: `race.policy`.
    #[serde(default)]
    pub policy: RacePolicy,
}

/// Per-field overrides of the tier's retry policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverrides {
    /// TOML: `retry.max_retries`.
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// TOML: `retry.base_delay_ms`.
    #[serde(rename = "base_delay_ms", default, with = "option_duration_ms")]
    pub base_delay: Option<Duration>,

    /// TOML: `retry.max_delay_ms`.
    #[serde(rename = "max_delay_ms", default, with = "option_duration_ms")]
    pub max_delay: Option<Duration>,

    /// TOML: `retry.backoff_multiplier`.
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    /// TOML: `retry.jitter_factor`.
    #[serde(default)]
    pub jitter_factor: Option<f64>,
}

impl RetryOverrides {
    pub fn apply(&self, base: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
        }
    }
}

/// Effective race parameters for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RaceResolvedConfig {
    pub concurrency: usize,
    #[serde(with = "duration_ms")]
    pub per_attempt_timeout: Duration,
    pub policy: RacePolicy,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutSet,
}

impl RaceConfig {
    pub fn resolve(
        &self,
        retry: &RetryOverrides,
        profile: &QualityProfile,
    ) -> Result<RaceResolvedConfig, KairosError> {
        let resolved = RaceResolvedConfig {
            concurrency: self.concurrency.unwrap_or(profile.concurrency).max(1),
            per_attempt_timeout: self
                .per_attempt_timeout
                .unwrap_or_else(|| profile.timeouts.attempt_budget()),
            policy: self.policy,
            retry: retry.apply(&profile.retry),
            timeouts: profile.timeouts,
        };
        resolved.retry.validate()?;
        Ok(resolved)
    }
}

/// Base cadence of the contention poller, before severity scaling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    /// Hard bound on retry actions. TOML: `poller.max_attempts`. Default: `150`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// TOML: `poller.base_interval_ms`. Default: `60`.
    #[serde(rename = "base_interval_ms", default = "default_base_interval", with = "duration_ms")]
    pub base_interval: Duration,

    /// Uniform `±` spread applied to the base interval.
    /// TOML: `poller.interval_variation_ms`. Default: `20`.
    #[serde(rename = "interval_variation_ms", default = "default_interval_variation", with = "duration_ms")]
    pub interval_variation: Duration,

    /// Fast taps per cycle. TOML: `poller.burst_size`. Default: `5`.
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,

    /// TOML: `poller.burst_interval_ms`. Default: `15`.
    #[serde(rename = "burst_interval_ms", default = "default_burst_interval", with = "duration_ms")]
    pub burst_interval: Duration,

    /// Pause right after a burst. TOML: `poller.rest_interval_ms`. Default: `200`.
    #[serde(rename = "rest_interval_ms", default = "default_rest_interval", with = "duration_ms")]
    pub rest_interval: Duration,

    /// Iterations per cycle; the surface is re-probed at every cycle boundary.
    /// TOML: `poller.progress_check_interval`. Default: `10`.
    #[serde(default = "default_progress_check_interval")]
    pub progress_check_interval: usize,

    /// Lower clamp on any computed delay. TOML: `poller.min_delay_ms`. Default: `10`.
    #[serde(rename = "min_delay_ms", default = "default_min_delay", with = "duration_ms")]
    pub min_delay: Duration,

    /// Upper clamp on any computed delay. TOML: `poller.max_delay_ms`. Default: `500`.
    #[serde(rename = "max_delay_ms", default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_interval: default_base_interval(),
            interval_variation: default_interval_variation(),
            burst_size: default_burst_size(),
            burst_interval: default_burst_interval(),
            rest_interval: default_rest_interval(),
            progress_check_interval: default_progress_check_interval(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), KairosError> {
        if self.max_attempts == 0 {
            return Err(KairosError::InvalidConfig(
                "poller.max_attempts must be > 0".to_string(),
            ));
        }
        if self.progress_check_interval == 0 {
            return Err(KairosError::InvalidConfig(
                "poller.progress_check_interval must be > 0".to_string(),
            ));
        }
        if self.burst_size >= self.progress_check_interval {
            return Err(KairosError::InvalidConfig(format!(
                "poller.burst_size ({}) must be below poller.progress_check_interval ({})",
                self.burst_size, self.progress_check_interval
            )));
        }
        if self.min_delay > self.max_delay {
            return Err(KairosError::InvalidConfig(format!(
                "poller.min_delay ({:?}) must not exceed poller.max_delay ({:?})",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

fn default_max_attempts() -> usize {
    150
}

fn default_base_interval() -> Duration {
    Duration::from_millis(60)
}

fn default_interval_variation() -> Duration {
    Duration::from_millis(20)
}

fn default_burst_size() -> usize {
    5
}

fn default_burst_interval() -> Duration {
    Duration::from_millis(15)
}

fn default_rest_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_progress_check_interval() -> usize {
    10
}

fn default_min_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_max_delay() -> Duration {
    Duration::from_millis(500)
}
