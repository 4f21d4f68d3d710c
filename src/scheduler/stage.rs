use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::contention::PollOutcome;
use crate::quality::NetworkQualityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    SyncTime,
    WaitDeadline,
    RaceAcquire,
    Contention,
    Poll,
    Success,
    Failure,
    Canceled,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Init => "INIT",
            Stage::SyncTime => "SYNC_TIME",
            Stage::WaitDeadline => "WAIT_DEADLINE",
            Stage::RaceAcquire => "RACE_ACQUIRE",
            Stage::Contention => "CONTENTION",
            Stage::Poll => "POLL",
            Stage::Success => "SUCCESS",
            Stage::Failure => "FAILURE",
            Stage::Canceled => "CANCELED",
            Stage::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    Canceled,
}

impl RunOutcome {
    pub fn stage(self) -> Stage {
        match self {
            RunOutcome::Success => Stage::Success,
            RunOutcome::Failure => Stage::Failure,
            RunOutcome::Canceled => Stage::Canceled,
        }
    }
}

/// Terminal result of one run, always carrying the progress made.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub reason: String,
    /// Acquisition calls issued during the race, retries included.
    pub attempts: usize,
    pub elapsed: Duration,
    pub tier: Option<NetworkQualityTier>,
    pub poll: Option<PollOutcome>,
    /// Message returned by the winning attempt.
    pub value: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {}ms: {} (race attempts: {}",
            self.outcome.stage(),
            self.elapsed.as_millis(),
            self.reason,
            self.attempts
        )?;
        if let Some(poll) = &self.poll {
            write!(
                f,
                ", poll attempts: {}/{} ok",
                poll.successful_attempts, poll.total_attempts
            )?;
        }
        if let Some(tier) = self.tier {
            write!(f, ", network: {tier}")?;
        }
        f.write_str(")")
    }
}
