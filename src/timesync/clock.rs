use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ClockSample, TimeReference};
use crate::config::TimeSyncConfig;
use crate::race::Interrupted;
use crate::utils::time::signed_millis;

/// Snapshot of the clock calibration. Replaced wholesale on every sync, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSyncState {
    pub offset: TimeDelta,
    /// Half-width of the interval the true offset was narrowed to.
    pub uncertainty: Duration,
    pub is_accurate: bool,
    pub last_sync_at: DateTime<Utc>,
    pub message: String,
}

impl ClockSyncState {
    fn unsynced() -> Self {
        Self {
            offset: TimeDelta::zero(),
            uncertainty: Duration::MAX,
            is_accurate: false,
            last_sync_at: Utc::now(),
            message: "clock not yet synchronized".to_string(),
        }
    }

    /// Reference time according to this calibration.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}

/// Offset estimate merged from several samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Estimate {
    pub offset: TimeDelta,
    pub uncertainty: Duration,
    /// False when the sample bounds do not overlap.
    pub consistent: bool,
}

/// Intersects the sample bounds; disjoint bounds fall back to the mean offset over their hull.
pub(crate) fn combine(samples: &[ClockSample]) -> Option<Estimate> {
    let lower = samples.iter().map(ClockSample::lower).max()?;
    let upper = samples.iter().map(ClockSample::upper).min()?;
    if lower <= upper {
        let merged = ClockSample::within(lower, upper, Duration::ZERO);
        return Some(Estimate {
            offset: merged.offset,
            uncertainty: merged.uncertainty,
            consistent: true,
        });
    }

    let count = i32::try_from(samples.len()).unwrap_or(i32::MAX);
    let hull = ClockSample::within(
        samples.iter().map(ClockSample::lower).min()?,
        samples.iter().map(ClockSample::upper).max()?,
        Duration::ZERO,
    );
    Some(Estimate {
        offset: samples.iter().map(|s| s.offset).sum::<TimeDelta>() / count,
        uncertainty: hull.uncertainty,
        consistent: false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Time actually spent waiting; zero if the release point had already passed.
    pub waited: Duration,
    /// Offset the deadline math was fixed to at wait start.
    pub offset: TimeDelta,
}

pub struct TimeSync {
    reference: Arc<dyn TimeReference>,
    cfg: TimeSyncConfig,
    state: watch::Sender<ClockSyncState>,
}

impl TimeSync {
    pub fn new(reference: Arc<dyn TimeReference>, cfg: TimeSyncConfig) -> Self {
        let (state, _) = watch::channel(ClockSyncState::unsynced());
        Self {
            reference,
            cfg,
            state,
        }
    }

    pub fn snapshot(&self) -> ClockSyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClockSyncState> {
        self.state.subscribe()
    }

    /// Returns the current state when it is accurate and fresh, otherwise re-measures.
    pub async fn check_sync_status(&self) -> ClockSyncState {
        let current = self.snapshot();
        let age = (Utc::now() - current.last_sync_at).to_std().unwrap_or_default();
        if current.is_accurate && age < self.cfg.resync_interval {
            debug!(
                offset_ms = signed_millis(current.offset),
                age_ms = age.as_millis() as u64,
                "[TimeSync] Reusing fresh calibration"
            );
            return current;
        }
        self.force_sync().await
    }

    /// Re-measures and atomically publishes the new state.
    pub async fn force_sync(&self) -> ClockSyncState {
        let measured = self.measure().await;
        self.state.send_replace(measured.clone());
        measured
    }

    async fn sample_round(&self) -> Vec<ClockSample> {
        let sample_timeout = self.cfg.sample_timeout;
        let samples = self.cfg.reference_urls.iter().map(|endpoint| async move {
            match tokio::time::timeout(sample_timeout, self.reference.sample(endpoint)).await {
                Ok(Ok(sample)) => Some(sample),
                Ok(Err(e)) => {
                    debug!(endpoint = %endpoint, error = %e, "[TimeSync] Reference sample failed");
                    None
                }
                Err(_) => {
                    debug!(endpoint = %endpoint, "[TimeSync] Reference sample timed out");
                    None
                }
            }
        });
        join_all(samples).await.into_iter().flatten().collect()
    }

    /// Samples every reference once per round, pausing `round_spacing` between rounds, until
    /// the bound is tight enough or the rounds run out. An empty first round ends early.
    async fn measure(&self) -> ClockSyncState {
        let mut samples: Vec<ClockSample> = Vec::new();
        for round in 0..self.cfg.rounds.max(1) {
            if round > 0 {
                tokio::time::sleep(self.cfg.round_spacing).await;
            }
            samples.extend(self.sample_round().await);
            match combine(&samples) {
                None => break,
                Some(estimate)
                    if estimate.consistent && estimate.uncertainty <= self.cfg.max_uncertainty =>
                {
                    break;
                }
                Some(_) => {}
            }
        }

        let Some(estimate) = combine(&samples) else {
            let last = self.snapshot();
            warn!(
                references = self.cfg.reference_urls.len(),
                offset_ms = signed_millis(last.offset),
                "[TimeSync] No time reference reachable; keeping last known offset"
            );
            return ClockSyncState {
                offset: last.offset,
                uncertainty: last.uncertainty,
                is_accurate: false,
                last_sync_at: Utc::now(),
                message: format!(
                    "no time reference reachable; using last known offset {}ms",
                    signed_millis(last.offset)
                ),
            };
        };

        let count = u32::try_from(samples.len()).unwrap_or(u32::MAX);
        let mean_rtt = samples.iter().map(|s| s.round_trip).sum::<Duration>() / count;
        let is_accurate = estimate.consistent
            && mean_rtt <= self.cfg.accuracy_threshold
            && estimate.uncertainty <= self.cfg.max_uncertainty;

        info!(
            offset_ms = signed_millis(estimate.offset),
            uncertainty_ms = estimate.uncertainty.as_millis() as u64,
            mean_rtt_ms = mean_rtt.as_millis() as u64,
            samples = samples.len(),
            references = self.cfg.reference_urls.len(),
            accurate = is_accurate,
            "[TimeSync] Clock calibrated"
        );

        let message = if estimate.consistent {
            format!(
                "synced from {} samples over {} references, offset {}ms ±{}ms, mean rtt {}ms",
                samples.len(),
                self.cfg.reference_urls.len(),
                signed_millis(estimate.offset),
                estimate.uncertainty.as_millis(),
                mean_rtt.as_millis()
            )
        } else {
            format!(
                "references disagree; best-effort offset {}ms from {} samples",
                signed_millis(estimate.offset),
                samples.len()
            )
        };

        ClockSyncState {
            offset: estimate.offset,
            uncertainty: estimate.uncertainty,
            is_accurate,
            last_sync_at: Utc::now(),
            message,
        }
    }

    /// Time left until `deadline - lead_time` under `state`'s offset; `None` once passed.
    pub fn remaining(
        state: &ClockSyncState,
        deadline: DateTime<Utc>,
        lead_time: Duration,
    ) -> Option<Duration> {
        let lead = TimeDelta::from_std(lead_time).unwrap_or(TimeDelta::zero());
        (deadline - state.now() - lead)
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }

    /// Sleeps until `deadline - lead_time`: one coarse sleep up to the fine window, short
    /// sleeps inside it, and a yield loop for the last `spin_threshold`.
    ///
    /// The offset is read once at entry; a concurrent resync does not move this wait.
    pub async fn wait_until(
        &self,
        deadline: DateTime<Utc>,
        lead_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitReport, Interrupted> {
        let state = self.snapshot();
        let entered = Instant::now();

        let Some(remaining) = Self::remaining(&state, deadline, lead_time) else {
            debug!(deadline = %deadline, "[TimeSync] Release point already passed");
            return Ok(WaitReport {
                waited: Duration::ZERO,
                offset: state.offset,
            });
        };
        let target = entered + remaining;

        info!(
            deadline = %deadline,
            remaining_ms = remaining.as_millis() as u64,
            lead_ms = lead_time.as_millis() as u64,
            offset_ms = signed_millis(state.offset),
            accurate = state.is_accurate,
            "[TimeSync] Waiting for deadline"
        );

        if let Some(coarse) = remaining.checked_sub(self.cfg.fine_window)
            && cancel
                .run_until_cancelled(tokio::time::sleep_until(entered + coarse))
                .await
                .is_none()
        {
            return Err(Interrupted::Cancelled);
        }

        let fine_step = Duration::from_millis(1);
        loop {
            if cancel.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }
            let now = Instant::now();
            if now >= target {
                break;
            }
            let left = target - now;
            if left > self.cfg.spin_threshold {
                let step = fine_step.min(left - self.cfg.spin_threshold);
                if cancel
                    .run_until_cancelled(tokio::time::sleep_until(now + step))
                    .await
                    .is_none()
                {
                    return Err(Interrupted::Cancelled);
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        let waited = entered.elapsed();
        debug!(waited_ms = waited.as_millis() as u64, "[TimeSync] Released");
        Ok(WaitReport {
            waited,
            offset: state.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KairosError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use url::Url;

    /// Reports a settable offset; `None` makes every endpoint unreachable.
    struct AdjustableReference {
        offset: Mutex<Option<TimeDelta>>,
        round_trip: Duration,
    }

    impl AdjustableReference {
        fn new(offset_ms: Option<i64>) -> Self {
            Self {
                offset: Mutex::new(offset_ms.map(TimeDelta::milliseconds)),
                round_trip: Duration::from_millis(40),
            }
        }

        fn set(&self, offset_ms: Option<i64>) {
            *self.offset.lock().unwrap() = offset_ms.map(TimeDelta::milliseconds);
        }
    }

    #[async_trait]
    impl TimeReference for AdjustableReference {
        async fn sample(&self, _endpoint: &Url) -> Result<ClockSample, KairosError> {
            let offset = *self.offset.lock().unwrap();
            offset
                .map(|offset| ClockSample {
                    offset,
                    uncertainty: self.round_trip / 2,
                    round_trip: self.round_trip,
                })
                .ok_or_else(|| KairosError::InvalidConfig("unreachable".to_string()))
        }
    }

    fn cfg(spin_threshold_ms: u64) -> TimeSyncConfig {
        TimeSyncConfig {
            reference_urls: vec![
                Url::parse("http://one.test/").unwrap(),
                Url::parse("http://two.test/").unwrap(),
            ],
            spin_threshold: Duration::from_millis(spin_threshold_ms),
            ..TimeSyncConfig::default()
        }
    }

    fn sync_with(reference: Arc<AdjustableReference>, spin_threshold_ms: u64) -> TimeSync {
        TimeSync::new(reference, cfg(spin_threshold_ms))
    }

    /// Answers like an HTTP `Date` header: the reference clock truncated to the second.
    struct WholeSecondReference {
        offset: TimeDelta,
    }

    #[async_trait]
    impl TimeReference for WholeSecondReference {
        async fn sample(&self, _endpoint: &Url) -> Result<ClockSample, KairosError> {
            let sent = Utc::now();
            let server = Utc::now() + self.offset;
            let stamp = DateTime::from_timestamp(server.timestamp(), 0).unwrap();
            let received = Utc::now();
            Ok(ClockSample::from_whole_second_stamp(sent, received, stamp))
        }
    }

    /// Alternates between two offsets that cannot both be right.
    struct SplitReference {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TimeReference for SplitReference {
        async fn sample(&self, _endpoint: &Url) -> Result<ClockSample, KairosError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let offset_ms = if n % 2 == 0 { 0 } else { 5_000 };
            Ok(ClockSample {
                offset: TimeDelta::milliseconds(offset_ms),
                uncertainty: Duration::from_millis(20),
                round_trip: Duration::from_millis(40),
            })
        }
    }

    #[test]
    fn combine_intersects_sample_bounds() {
        let samples = [
            ClockSample::within(TimeDelta::milliseconds(-400), TimeDelta::milliseconds(600), Duration::ZERO),
            ClockSample::within(TimeDelta::milliseconds(-100), TimeDelta::milliseconds(900), Duration::ZERO),
            ClockSample::within(TimeDelta::milliseconds(-700), TimeDelta::milliseconds(100), Duration::ZERO),
        ];
        let estimate = combine(&samples).unwrap();
        assert!(estimate.consistent);
        assert_eq!(estimate.offset, TimeDelta::zero());
        assert_eq!(estimate.uncertainty, Duration::from_millis(100));

        assert!(combine(&[]).is_none());
    }

    #[tokio::test]
    async fn whole_second_references_converge_near_the_true_offset() {
        for offset_ms in [0, 730] {
            let sync = TimeSync::new(
                Arc::new(WholeSecondReference {
                    offset: TimeDelta::milliseconds(offset_ms),
                }),
                cfg(2),
            );

            let state = sync.force_sync().await;
            let error = (state.offset - TimeDelta::milliseconds(offset_ms)).abs();
            assert!(state.is_accurate, "{state:?}");
            assert!(state.uncertainty <= Duration::from_millis(150), "{state:?}");
            assert!(error.to_std().unwrap() <= state.uncertainty, "{state:?}");
        }
    }

    #[tokio::test]
    async fn a_single_whole_second_round_is_not_accurate() {
        let sync = TimeSync::new(
            Arc::new(WholeSecondReference {
                offset: TimeDelta::zero(),
            }),
            TimeSyncConfig {
                reference_urls: vec![Url::parse("http://one.test/").unwrap()],
                rounds: 1,
                ..cfg(2)
            },
        );

        let state = sync.force_sync().await;
        assert!(!state.is_accurate, "{state:?}");
        assert!(state.uncertainty >= Duration::from_millis(500));
        assert!(state.offset.abs() <= TimeDelta::milliseconds(510));
    }

    #[tokio::test]
    async fn disagreeing_references_are_flagged_inaccurate() {
        let sync = TimeSync::new(
            Arc::new(SplitReference {
                calls: Default::default(),
            }),
            TimeSyncConfig {
                rounds: 1,
                ..cfg(2)
            },
        );

        let state = sync.force_sync().await;
        assert!(!state.is_accurate);
        assert_eq!(state.offset, TimeDelta::milliseconds(2_500));
        assert!(state.message.contains("disagree"), "{}", state.message);
    }

    #[tokio::test]
    async fn force_sync_combines_and_publishes() {
        let reference = Arc::new(AdjustableReference::new(Some(250)));
        let sync = sync_with(reference, 2);
        let mut watcher = sync.subscribe();

        let state = sync.force_sync().await;
        assert!(state.is_accurate);
        assert_eq!(state.offset, TimeDelta::milliseconds(250));
        assert!(watcher.has_changed().unwrap());
        assert_eq!(*watcher.borrow_and_update(), state);
        assert_eq!(sync.snapshot(), state);
    }

    #[tokio::test]
    async fn unreachable_references_keep_last_offset_but_flag_inaccurate() {
        let reference = Arc::new(AdjustableReference::new(Some(-120)));
        let sync = sync_with(reference.clone(), 2);
        sync.force_sync().await;

        reference.set(None);
        let state = sync.force_sync().await;
        assert!(!state.is_accurate);
        assert_eq!(state.offset, TimeDelta::milliseconds(-120));
        assert!(state.message.contains("no time reference reachable"));
    }

    #[tokio::test]
    async fn never_synced_defaults_to_zero_offset() {
        let sync = sync_with(Arc::new(AdjustableReference::new(None)), 2);
        let state = sync.check_sync_status().await;
        assert!(!state.is_accurate);
        assert_eq!(state.offset, TimeDelta::zero());
    }

    #[tokio::test]
    async fn fresh_accurate_state_is_reused() {
        let reference = Arc::new(AdjustableReference::new(Some(10)));
        let sync = sync_with(reference.clone(), 2);
        sync.force_sync().await;

        reference.set(Some(900));
        let state = sync.check_sync_status().await;
        assert_eq!(state.offset, TimeDelta::milliseconds(10));

        let forced = sync.force_sync().await;
        assert_eq!(forced.offset, TimeDelta::milliseconds(900));
    }

    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let sync = sync_with(Arc::new(AdjustableReference::new(Some(0))), 2);
        sync.force_sync().await;

        let report = sync
            .wait_until(
                Utc::now() - TimeDelta::seconds(1),
                Duration::from_millis(5),
                &CancellationToken::new(),
            )
            .await
            .expect("not cancelled");
        assert_eq!(report.waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn releases_close_to_deadline_minus_lead() {
        let sync = sync_with(Arc::new(AdjustableReference::new(Some(0))), 2);
        sync.force_sync().await;

        let started = std::time::Instant::now();
        let deadline = Utc::now() + TimeDelta::milliseconds(180);
        sync.wait_until(deadline, Duration::from_millis(30), &CancellationToken::new())
            .await
            .expect("not cancelled");
        let elapsed = started.elapsed();

        let expected = Duration::from_millis(150);
        assert!(elapsed + Duration::from_millis(5) >= expected, "released early: {elapsed:?}");
        assert!(elapsed <= expected + Duration::from_millis(40), "released late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn offset_shifts_the_release_point() {
        let sync = sync_with(Arc::new(AdjustableReference::new(Some(1_000))), 0);
        sync.force_sync().await;

        // Reference time is one second ahead, so this deadline is ~200ms away.
        let deadline = Utc::now() + TimeDelta::milliseconds(1_200);
        let report = sync
            .wait_until(deadline, Duration::ZERO, &CancellationToken::new())
            .await
            .expect("not cancelled");

        assert!(report.waited <= Duration::from_millis(205));
        assert!(report.waited >= Duration::from_millis(150));
        assert_eq!(report.offset, TimeDelta::milliseconds(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn resync_mid_wait_does_not_move_the_deadline() {
        let reference = Arc::new(AdjustableReference::new(Some(0)));
        let sync = Arc::new(sync_with(reference.clone(), 0));
        sync.force_sync().await;

        let resync = {
            let sync = sync.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                reference.set(Some(10_000));
                sync.force_sync().await
            })
        };

        let deadline = Utc::now() + TimeDelta::milliseconds(500);
        let report = sync
            .wait_until(deadline, Duration::ZERO, &CancellationToken::new())
            .await
            .expect("not cancelled");

        assert_eq!(resync.await.unwrap().offset, TimeDelta::milliseconds(10_000));
        assert_eq!(report.offset, TimeDelta::zero());
        assert!(report.waited >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_wait() {
        let sync = sync_with(Arc::new(AdjustableReference::new(Some(0))), 0);
        sync.force_sync().await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = sync
            .wait_until(Utc::now() + TimeDelta::seconds(60), Duration::ZERO, &cancel)
            .await;

        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
