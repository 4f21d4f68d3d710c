//! Top-level orchestration: sync, wait, race, and fall back to polling under contention.

mod stage;

pub use stage::{RunOutcome, RunReport, Stage};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, PollerConfig, RaceConfig, RaceResolvedConfig, RetryOverrides};
use crate::contention::{ContentionPoller, ContentionSignal, ExitReason, PollOutcome};
use crate::error::{AcquireError, IsRetryable};
use crate::quality::{NetworkQualityTier, QualityAdvisor};
use crate::race::{RaceExecutor, RaceResult};
use crate::retry::BackoffRetry;
use crate::status::{StatusRecord, StatusSink};
use crate::surface::{AcquisitionRequest, InteractionSurface};
use crate::timesync::{ClockSyncState, TimeSync};
use crate::utils::logging::with_pretty_json_debug;
use crate::utils::time::signed_millis;

/// What to acquire and when.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: String,
    pub payload: Map<String, Value>,
    /// `None` fires as soon as the clock is synced.
    pub deadline: Option<DateTime<Utc>>,
}

/// Scheduler knobs lifted out of [`Config`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerSettings {
    pub lead_time: Duration,
    pub race: RaceConfig,
    pub retry: RetryOverrides,
    pub poller: PollerConfig,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            lead_time: cfg.schedule.lead_time,
            race: cfg.race.clone(),
            retry: cfg.retry.clone(),
            poller: cfg.poller.clone(),
        }
    }
}

pub struct AcquisitionScheduler {
    time_sync: Arc<TimeSync>,
    advisor: QualityAdvisor,
    surface: Arc<dyn InteractionSurface>,
    sink: Arc<dyn StatusSink>,
    poller: ContentionPoller,
    settings: SchedulerSettings,
}

/// Where a run ended and why, before it is folded into a [`RunReport`].
struct Verdict {
    outcome: RunOutcome,
    reason: String,
    value: Option<String>,
}

impl Verdict {
    fn success(reason: impl Into<String>, value: Option<String>) -> Self {
        Self {
            outcome: RunOutcome::Success,
            reason: reason.into(),
            value,
        }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Failure,
            reason: reason.into(),
            value: None,
        }
    }

    fn canceled(during: Stage) -> Self {
        Self {
            outcome: RunOutcome::Canceled,
            reason: format!("canceled during {during}"),
            value: None,
        }
    }
}

/// Mutable bookkeeping owned by the orchestration task.
struct RunState {
    run_id: Uuid,
    started: Instant,
    attempts: Arc<AtomicUsize>,
    tier: Option<NetworkQualityTier>,
    poll: Option<PollOutcome>,
}

impl AcquisitionScheduler {
    pub fn new(
        time_sync: Arc<TimeSync>,
        advisor: QualityAdvisor,
        surface: Arc<dyn InteractionSurface>,
        sink: Arc<dyn StatusSink>,
        settings: SchedulerSettings,
    ) -> Self {
        let poller = ContentionPoller::new(settings.poller.clone());
        Self {
            time_sync,
            advisor,
            surface,
            sink,
            poller,
            settings,
        }
    }

    pub fn time_sync(&self) -> &Arc<TimeSync> {
        &self.time_sync
    }

    /// Runs one acquisition to a terminal outcome. Never panics on remote failures; every
    /// path ends in SUCCESS, FAILURE or CANCELED followed by DONE.
    pub async fn run(&self, request: RunRequest, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("acquisition", %run_id, target = %request.target);
        async move {
            let mut state = RunState {
                run_id,
                started: Instant::now(),
                attempts: Arc::new(AtomicUsize::new(0)),
                tier: None,
                poll: None,
            };

            let verdict = self.drive(&request, &mut state, cancel).await;
            self.transition(verdict.outcome.stage(), verdict.reason.clone());

            let report = RunReport {
                run_id: state.run_id,
                outcome: verdict.outcome,
                reason: verdict.reason,
                attempts: state.attempts.load(Ordering::SeqCst),
                elapsed: state.started.elapsed(),
                tier: state.tier,
                poll: state.poll,
                value: verdict.value,
            };
            self.transition(Stage::Done, report.to_string());
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        request: &RunRequest,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Verdict {
        self.transition(
            Stage::Init,
            format!("run {} for `{}` started", state.run_id, request.target),
        );
        if cancel.is_cancelled() {
            return Verdict::canceled(Stage::Init);
        }

        self.transition(Stage::SyncTime, "calibrating clock and assessing network");
        let Some((clock, assessment)) = cancel
            .run_until_cancelled(async { tokio::join!(self.sync_clock(), self.advisor.assess()) })
            .await
        else {
            return Verdict::canceled(Stage::SyncTime);
        };
        state.tier = Some(assessment.tier);
        self.transition(
            Stage::SyncTime,
            format!(
                "offset {}ms ({}), network {} at {}ms",
                signed_millis(clock.offset),
                if clock.is_accurate { "accurate" } else { "inaccurate" },
                assessment.tier,
                assessment.latency.as_millis()
            ),
        );

        let resolved = match self
            .settings
            .race
            .resolve(&self.settings.retry, &assessment.profile())
        {
            Ok(resolved) => resolved,
            Err(e) => return Verdict::failure(e.to_string()),
        };
        with_pretty_json_debug(&resolved, |pretty| {
            debug!(config = %pretty, "[Scheduler] Effective race configuration");
        });

        match request.deadline {
            Some(deadline) => {
                self.transition(
                    Stage::WaitDeadline,
                    format!(
                        "waiting for {deadline} (lead {}ms)",
                        self.settings.lead_time.as_millis()
                    ),
                );
                if self
                    .time_sync
                    .wait_until(deadline, self.settings.lead_time, cancel)
                    .await
                    .is_err()
                {
                    return Verdict::canceled(Stage::WaitDeadline);
                }
            }
            None => self.transition(Stage::WaitDeadline, "no deadline set; firing immediately"),
        }
        if cancel.is_cancelled() {
            return Verdict::canceled(Stage::WaitDeadline);
        }

        self.transition(
            Stage::RaceAcquire,
            format!(
                "racing {} attempts, {}ms each, up to {} retries",
                resolved.concurrency,
                resolved.per_attempt_timeout.as_millis(),
                resolved.retry.max_retries
            ),
        );
        let template = AcquisitionRequest::new(
            request.target.clone(),
            request.payload.clone(),
            resolved.timeouts,
        );
        let race = self
            .race(&template, &resolved, state.attempts.clone(), cancel)
            .await;

        if race.is_cancelled() {
            return Verdict::canceled(Stage::RaceAcquire);
        }
        if let Some(winner) = race.winner() {
            let latency = winner.latency;
            let index = winner.index;
            let value = race.into_selected().and_then(Result::ok);
            return Verdict::success(
                format!("attempt {index} succeeded in {}ms", latency.as_millis()),
                value,
            );
        }

        let contention = race
            .errors()
            .filter_map(AcquireError::contention)
            .max_by_key(|signal| signal.severity)
            .cloned();
        match contention {
            Some(signal) => self.poll(&signal, state, cancel).await,
            None => {
                let reason = race
                    .first_error()
                    .map_or_else(|| "race produced no outcome".to_string(), ToString::to_string);
                Verdict::failure(reason)
            }
        }
    }

    /// `check_sync_status` already forces a resync when the cached state is inaccurate or
    /// stale, so one call suffices. Never fails the run.
    async fn sync_clock(&self) -> ClockSyncState {
        let state = self.time_sync.check_sync_status().await;
        if !state.is_accurate {
            warn!(message = %state.message, "[Scheduler] Proceeding on best-effort clock offset");
        }
        state
    }

    async fn race(
        &self,
        template: &AcquisitionRequest,
        resolved: &RaceResolvedConfig,
        attempts: Arc<AtomicUsize>,
        cancel: &CancellationToken,
    ) -> RaceResult<String, AcquireError> {
        let retry = BackoffRetry::new(resolved.retry);
        let operations: Vec<_> = (0..resolved.concurrency)
            .map(|index| {
                let request = template.for_attempt(index);
                let surface = self.surface.clone();
                let attempts = attempts.clone();
                async move {
                    retry
                        .execute_when(
                            || {
                                attempts.fetch_add(1, Ordering::SeqCst);
                                let surface = surface.clone();
                                let request = &request;
                                async move {
                                    surface
                                        .perform_acquisition_attempt(request)
                                        .await
                                        .into_result()
                                }
                            },
                            |err: &AcquireError| err.is_retryable(),
                        )
                        .await
                }
            })
            .collect();

        RaceExecutor::new(resolved.policy)
            .race(operations, resolved.per_attempt_timeout, cancel)
            .await
    }

    async fn poll(
        &self,
        signal: &ContentionSignal,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Verdict {
        self.transition(Stage::Contention, signal.summary());
        self.transition(
            Stage::Poll,
            format!("polling under {} contention", signal.severity),
        );

        let outcome = self.poller.run(self.surface.as_ref(), signal, cancel).await;
        let verdict = match outcome.exit_reason {
            ExitReason::Admitted => Verdict::success(
                format!(
                    "admitted after {} poll attempts ({} acknowledged)",
                    outcome.total_attempts, outcome.successful_attempts
                ),
                None,
            ),
            ExitReason::Exhausted => Verdict::failure(format!(
                "contention persisted through {} poll attempts",
                outcome.total_attempts
            )),
            ExitReason::Canceled => Verdict::canceled(Stage::Poll),
        };
        state.poll = Some(outcome);
        verdict
    }

    fn transition(&self, stage: Stage, message: impl Into<String>) {
        let record = StatusRecord::new(stage, message);
        info!(stage = %stage, message = %record.message, "[Scheduler] {stage}");
        self.sink.emit(record);
    }
}
