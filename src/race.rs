use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Whether a race waits for every attempt or stops at the first success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePolicy {
    /// Join on every attempt; in-flight requests are never interrupted by a sibling's success.
    #[default]
    AwaitAll,
    /// Drop the remaining attempts once one succeeds.
    FirstSuccess,
}

/// Why an attempt ended without producing its own result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug)]
pub struct AttemptOutcome<T, E> {
    /// Launch position of the attempt.
    pub index: usize,
    pub latency: Duration,
    pub result: Result<T, E>,
}

impl<T, E> AttemptOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }
}

/// Outcomes in completion order. Attempts that never completed (cancellation, early exit)
/// are appended last as interrupted failures.
#[derive(Debug)]
pub struct RaceResult<T, E> {
    outcomes: Vec<AttemptOutcome<T, E>>,
    cancelled: bool,
    elapsed: Duration,
}

impl<T, E> RaceResult<T, E> {
    pub fn outcomes(&self) -> &[AttemptOutcome<T, E>] {
        &self.outcomes
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Lowest-latency success; ties go to the earlier launch index.
    pub fn winner(&self) -> Option<&AttemptOutcome<T, E>> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .min_by_key(|o| (o.latency, o.index))
    }

    /// First error in completion order.
    pub fn first_error(&self) -> Option<&E> {
        self.outcomes.iter().find_map(AttemptOutcome::error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &E> {
        self.outcomes.iter().filter_map(AttemptOutcome::error)
    }

    /// Consumes the race: the winner's value, else the first recorded error.
    /// `None` only for a race that launched nothing.
    pub fn into_selected(self) -> Option<Result<T, E>> {
        let winner = self
            .outcomes
            .iter()
            .filter(|o| o.is_success())
            .min_by_key(|o| (o.latency, o.index))
            .map(|o| o.index);

        let mut outcomes = self.outcomes.into_iter();
        match winner {
            Some(index) => outcomes.find(|o| o.index == index).map(|o| o.result),
            None => outcomes.find(|o| o.result.is_err()).map(|o| o.result),
        }
    }
}

/// Runs homogeneous attempts concurrently under a shared per-attempt timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaceExecutor {
    policy: RacePolicy,
}

impl RaceExecutor {
    pub fn new(policy: RacePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RacePolicy {
        self.policy
    }

    /// Launches every operation at once. A timeout fails only its own attempt; cancellation
    /// stops the race and marks unfinished attempts as cancelled.
    pub async fn race<T, E, F>(
        &self,
        operations: Vec<F>,
        per_attempt_timeout: Duration,
        cancel: &CancellationToken,
    ) -> RaceResult<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        let started = Instant::now();
        let launched = operations.len();
        let mut finished = vec![false; launched];
        let mut outcomes = Vec::with_capacity(launched);

        let mut pending: FuturesUnordered<_> = operations
            .into_iter()
            .enumerate()
            .map(|(index, operation)| async move {
                let begin = Instant::now();
                let result = match tokio::time::timeout(per_attempt_timeout, operation).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(Interrupted::TimedOut(per_attempt_timeout))),
                };
                AttemptOutcome {
                    index,
                    latency: begin.elapsed(),
                    result,
                }
            })
            .collect();

        let mut cancelled = cancel.is_cancelled();
        while !cancelled {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                }
                next = pending.next() => {
                    let Some(outcome) = next else {
                        break;
                    };
                    debug!(
                        attempt = outcome.index,
                        latency_ms = outcome.latency.as_millis() as u64,
                        success = outcome.is_success(),
                        "[Race] Attempt finished"
                    );
                    finished[outcome.index] = true;
                    let won = outcome.is_success();
                    outcomes.push(outcome);
                    if won && self.policy == RacePolicy::FirstSuccess {
                        break;
                    }
                }
            }
        }
        drop(pending);

        let elapsed = started.elapsed();
        for (index, _) in finished.iter().enumerate().filter(|(_, done)| !**done) {
            outcomes.push(AttemptOutcome {
                index,
                latency: elapsed,
                result: Err(E::from(Interrupted::Cancelled)),
            });
        }

        let result = RaceResult {
            outcomes,
            cancelled,
            elapsed,
        };
        info!(
            launched,
            successes = result.success_count(),
            cancelled,
            policy = ?self.policy,
            elapsed_ms = elapsed.as_millis() as u64,
            "[Race] Joined"
        );
        result
    }
}
