use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ContentionSignal, RetryHandle, Severity};
use crate::config::PollerConfig;
use crate::surface::InteractionSurface;
use crate::utils::time::{duration_from_secs_f64, scale};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The surface stopped reporting contention.
    Admitted,
    /// `max_attempts` retry actions were spent without admission.
    Exhausted,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub success: bool,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub elapsed: Duration,
    pub exit_reason: ExitReason,
}

/// Scales the base cadence by severity: MILD eases off, SEVERE presses harder.
///
/// The burst stays below `progress_check_interval`, so every cycle reaches the rest and
/// base intervals.
pub fn effective_config(base: &PollerConfig, severity: Severity) -> PollerConfig {
    let mut cfg = base.clone();
    cfg.progress_check_interval = base.progress_check_interval.max(1);
    match severity {
        Severity::Mild => {
            cfg.base_interval = base.base_interval.saturating_mul(4) / 3;
            cfg.max_attempts = (base.max_attempts.saturating_mul(2) / 3).max(1);
        }
        Severity::Moderate => {}
        Severity::Severe => {
            cfg.base_interval = base.base_interval.saturating_mul(5) / 6;
            cfg.max_attempts = base.max_attempts.saturating_mul(4) / 3;
            cfg.burst_size = (base.burst_size.saturating_mul(7) / 5).max(base.burst_size.saturating_add(1));
        }
    }
    cfg.burst_size = cfg.burst_size.min(cfg.progress_check_interval - 1);
    cfg
}

fn severity_factor(severity: Severity) -> f64 {
    match severity {
        Severity::Mild => 1.2,
        Severity::Moderate => 1.0,
        Severity::Severe => 0.8,
    }
}

/// Delay after iteration `iteration` given a variation sample in `[-1, 1]`.
///
/// Each cycle of `progress_check_interval` iterations starts with `burst_size` fast taps,
/// then one rest, then jittered base intervals.
pub(crate) fn cadence_delay(
    cfg: &PollerConfig,
    severity: Severity,
    iteration: usize,
    variation_sample: f64,
) -> Duration {
    let position = iteration % cfg.progress_check_interval.max(1);
    let raw = if position < cfg.burst_size {
        cfg.burst_interval
    } else if position == cfg.burst_size {
        cfg.rest_interval
    } else {
        let offset = cfg.interval_variation.as_secs_f64() * variation_sample.clamp(-1.0, 1.0);
        duration_from_secs_f64(cfg.base_interval.as_secs_f64() + offset)
    };

    scale(raw, severity_factor(severity)).clamp(cfg.min_delay, cfg.max_delay.max(cfg.min_delay))
}

/// Bounded retry loop entered after a contention signal.
#[derive(Debug, Clone)]
pub struct ContentionPoller {
    base: PollerConfig,
}

struct Progress {
    started: Instant,
    total_attempts: usize,
    successful_attempts: usize,
}

impl Progress {
    fn finish(self, exit_reason: ExitReason) -> PollOutcome {
        PollOutcome {
            success: exit_reason == ExitReason::Admitted,
            total_attempts: self.total_attempts,
            successful_attempts: self.successful_attempts,
            elapsed: self.started.elapsed(),
            exit_reason,
        }
    }
}

impl ContentionPoller {
    pub fn new(base: PollerConfig) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &PollerConfig {
        &self.base
    }

    /// Polls until the surface admits us, the attempt budget runs out, or `cancel` fires.
    ///
    /// The surface is probed at every cycle boundary after the first and right after any
    /// retry action that reports success. Iteration 0 skips the probe: `signal` was observed
    /// just before polling started.
    pub async fn run<S>(
        &self,
        surface: &S,
        signal: &ContentionSignal,
        cancel: &CancellationToken,
    ) -> PollOutcome
    where
        S: InteractionSurface + ?Sized,
    {
        let severity = signal.severity;
        let cfg = effective_config(&self.base, severity);
        let mut progress = Progress {
            started: Instant::now(),
            total_attempts: 0,
            successful_attempts: 0,
        };
        let mut handle: Option<RetryHandle> = signal.retry_handle.clone();
        let mut probe_next = false;

        info!(
            severity = %severity,
            keywords = %signal.summary(),
            max_attempts = cfg.max_attempts,
            base_interval_ms = cfg.base_interval.as_millis() as u64,
            burst_size = cfg.burst_size,
            "[Poller] Contention polling started"
        );

        for iteration in 0..cfg.max_attempts {
            if cancel.is_cancelled() {
                return self.report(progress.finish(ExitReason::Canceled));
            }

            let due = iteration % cfg.progress_check_interval == 0;
            if iteration > 0 && (probe_next || due) {
                probe_next = false;
                let Some(scan) = cancel
                    .run_until_cancelled(surface.scan_for_contention())
                    .await
                else {
                    return self.report(progress.finish(ExitReason::Canceled));
                };
                match scan {
                    None => {
                        debug!(iteration, "[Poller] Contention cleared on probe");
                        return self.report(progress.finish(ExitReason::Admitted));
                    }
                    Some(current) => {
                        if current.retry_handle.is_some() {
                            handle = current.retry_handle;
                        }
                    }
                }
            }

            let Some(resolved) = cancel
                .run_until_cancelled(surface.resolve_retry_handle(handle.as_ref()))
                .await
            else {
                return self.report(progress.finish(ExitReason::Canceled));
            };
            handle = resolved;

            let Some(ok) = cancel
                .run_until_cancelled(surface.invoke_retry_action(handle.as_ref()))
                .await
            else {
                return self.report(progress.finish(ExitReason::Canceled));
            };
            progress.total_attempts += 1;
            if ok {
                progress.successful_attempts += 1;
                probe_next = true;
            }

            if iteration + 1 == cfg.max_attempts {
                break;
            }

            let sample = rand::rng().random_range(-1.0..=1.0);
            let delay = cadence_delay(&cfg, severity, iteration, sample);
            if cancel
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return self.report(progress.finish(ExitReason::Canceled));
            }
        }

        // A successful final tap gets one last look before giving up.
        if probe_next
            && let Some(None) = cancel
                .run_until_cancelled(surface.scan_for_contention())
                .await
        {
            return self.report(progress.finish(ExitReason::Admitted));
        }

        let exit = if cancel.is_cancelled() {
            ExitReason::Canceled
        } else {
            ExitReason::Exhausted
        };
        self.report(progress.finish(exit))
    }

    fn report(&self, outcome: PollOutcome) -> PollOutcome {
        match outcome.exit_reason {
            ExitReason::Admitted => info!(
                attempts = outcome.total_attempts,
                successful = outcome.successful_attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "[Poller] Admitted"
            ),
            ExitReason::Exhausted => warn!(
                attempts = outcome.total_attempts,
                successful = outcome.successful_attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "[Poller] Attempts exhausted under contention"
            ),
            ExitReason::Canceled => info!(
                attempts = outcome.total_attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "[Poller] Canceled"
            ),
        }
        outcome
    }
}
