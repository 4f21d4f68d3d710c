use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use url::Url;

use crate::error::KairosError;

/// One timing exchange with a reference endpoint.
///
/// The true offset lies within `offset ± uncertainty`; samples from several exchanges are
/// combined by intersecting those intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// `reference - local`; positive when the local clock is behind.
    pub offset: TimeDelta,
    pub uncertainty: Duration,
    pub round_trip: Duration,
}

impl ClockSample {
    /// Sample whose offset is known to lie in `[lower, upper]`.
    pub fn within(lower: TimeDelta, upper: TimeDelta, round_trip: Duration) -> Self {
        let (lower, upper) = if lower <= upper { (lower, upper) } else { (upper, lower) };
        let half = (upper - lower) / 2;
        Self {
            offset: lower + half,
            uncertainty: half.to_std().unwrap_or_default(),
            round_trip,
        }
    }

    /// Exchange sent at `sent_at` and answered at `received_at` (local clock) with an exact
    /// `server_time` stamped somewhere in between.
    pub fn from_exchange(
        sent_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        server_time: DateTime<Utc>,
    ) -> Self {
        let received_at = received_at.max(sent_at);
        Self::within(
            server_time - received_at,
            server_time - sent_at,
            round_trip(sent_at, received_at),
        )
    }

    /// Like [`Self::from_exchange`], but `stamp` is truncated to the second, as HTTP `Date`
    /// is: the server's clock read anywhere in `[stamp, stamp + 1s)`.
    pub fn from_whole_second_stamp(
        sent_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        stamp: DateTime<Utc>,
    ) -> Self {
        let received_at = received_at.max(sent_at);
        Self::within(
            stamp - received_at,
            stamp + TimeDelta::seconds(1) - sent_at,
            round_trip(sent_at, received_at),
        )
    }

    pub fn lower(&self) -> TimeDelta {
        self.offset
            .checked_sub(&uncertainty_delta(self.uncertainty))
            .unwrap_or(TimeDelta::MIN)
    }

    pub fn upper(&self) -> TimeDelta {
        self.offset
            .checked_add(&uncertainty_delta(self.uncertainty))
            .unwrap_or(TimeDelta::MAX)
    }
}

fn round_trip(sent_at: DateTime<Utc>, received_at: DateTime<Utc>) -> Duration {
    (received_at - sent_at).to_std().unwrap_or_default()
}

fn uncertainty_delta(uncertainty: Duration) -> TimeDelta {
    TimeDelta::from_std(uncertainty).unwrap_or(TimeDelta::MAX)
}

/// Source of clock samples. Only reachability and timing matter; payloads are ignored.
#[async_trait]
pub trait TimeReference: Send + Sync {
    async fn sample(&self, endpoint: &Url) -> Result<ClockSample, KairosError>;
}
