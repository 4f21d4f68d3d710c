use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::duration_ms;
use crate::error::KairosError;
use crate::utils::time::duration_from_secs_f64;

/// Shape of the delay curve between attempts.
///
/// Retry `i` (1-indexed) waits `min(max_delay, base_delay * multiplier^(i-1))`, shifted by a
/// uniform jitter of `±delay * jitter_factor / 2`, then clamped to `[base_delay, max_delay]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: usize,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), KairosError> {
        if self.backoff_multiplier <= 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(KairosError::InvalidConfig(format!(
                "backoff_multiplier must be finite and > 1 (got {})",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(KairosError::InvalidConfig(format!(
                "jitter_factor must be within [0, 1] (got {})",
                self.jitter_factor
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(KairosError::InvalidConfig(format!(
                "base_delay ({:?}) must not exceed max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Total number of attempts including the first one.
    pub fn total_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Pre-jitter delay before retry `retry` (1-indexed).
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            duration_from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Applies a jitter sample in `[-1, 1]` to a nominal delay and clamps the result.
    pub fn jittered(&self, nominal: Duration, sample: f64) -> Duration {
        let spread = nominal.as_secs_f64() * self.jitter_factor / 2.0;
        let secs = nominal.as_secs_f64() + spread * sample.clamp(-1.0, 1.0);
        let floor = self.base_delay.as_secs_f64();
        let ceil = self.max_delay.as_secs_f64().max(floor);
        duration_from_secs_f64(secs.clamp(floor, ceil))
    }

    /// Delay before retry `retry` (1-indexed) with a fresh jitter draw.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter_factor <= 0.0 {
            return self.jittered(nominal, 0.0);
        }
        let sample = rand::rng().random_range(-1.0..=1.0);
        self.jittered(nominal, sample)
    }
}

/// Delay iterator handed to `backon`; yields one delay per remaining retry.
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    retry: u32,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry as usize >= self.policy.max_retries {
            return None;
        }
        self.retry += 1;
        Some(self.policy.delay_for(self.retry))
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff {
            policy: self,
            retry: 0,
        }
    }
}

/// Bounded retry executor over a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct BackoffRetry {
    policy: RetryPolicy,
}

impl BackoffRetry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent. Every error is
    /// treated as retryable; the last one is surfaced on exhaustion.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_when(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but errors rejected by `retryable` are returned
    /// immediately without consuming further attempts.
    pub async fn execute_when<T, E, Fut, Op, P>(&self, operation: Op, retryable: P) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        self.execute_observed(operation, retryable, |_, _| {}).await
    }

    /// Full form: `on_retry` is invoked with the failing error and the delay about to be slept.
    pub async fn execute_observed<T, E, Fut, Op, P, N>(
        &self,
        operation: Op,
        retryable: P,
        mut on_retry: N,
    ) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        N: FnMut(&E, Duration),
        E: std::fmt::Display,
    {
        let max_retries = self.policy.max_retries;
        let result = operation
            .retry(self.policy)
            .when(retryable)
            .notify(|err: &E, delay: Duration| {
                debug!(error = %err, ?delay, max_retries, "[Retry] Attempt failed, backing off");
                on_retry(err, delay);
            })
            .await;

        if let Err(err) = &result {
            debug!(error = %err, max_retries, "[Retry] Attempt chain ended with error");
        }
        result
    }
}
