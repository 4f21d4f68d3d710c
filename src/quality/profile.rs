use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::duration_ms;
use crate::retry::RetryPolicy;

/// How the host reaches the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportClass {
    /// Local wireless / LAN link.
    Local,
    /// Cellular or other wide-area link.
    WideArea,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkQualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl NetworkQualityTier {
    pub const ALL: [NetworkQualityTier; 4] = [Self::Excellent, Self::Good, Self::Fair, Self::Poor];

    /// `<50ms` on a local link is EXCELLENT; otherwise `<100ms` GOOD, `<300ms` FAIR, else POOR.
    pub fn classify(latency: Duration, transport: TransportClass) -> Self {
        let ms = latency.as_millis();
        match ms {
            0..50 if transport == TransportClass::Local => Self::Excellent,
            0..100 => Self::Good,
            100..300 => Self::Fair,
            _ => Self::Poor,
        }
    }

    /// Timeouts, concurrency and retry aggressiveness for this tier. Worse tiers get wider
    /// timeouts, more parallel attempts and more patient retries.
    pub fn profile(self) -> QualityProfile {
        let (connect, read_write, concurrency, max_retries, base_ms, max_ms) = match self {
            Self::Excellent => (3, 5, 2, 1, 50, 500),
            Self::Good => (5, 8, 3, 2, 100, 1000),
            Self::Fair => (10, 15, 4, 3, 200, 1500),
            Self::Poor => (15, 20, 5, 4, 300, 2000),
        };
        QualityProfile {
            tier: self,
            timeouts: TimeoutSet {
                connect: Duration::from_secs(connect),
                read: Duration::from_secs(read_write),
                write: Duration::from_secs(read_write),
            },
            concurrency,
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                backoff_multiplier: 2.0,
                jitter_factor: 0.2,
            },
        }
    }
}

impl fmt::Display for NetworkQualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSet {
    #[serde(rename = "connect_ms", with = "duration_ms")]
    pub connect: Duration,
    #[serde(rename = "read_ms", with = "duration_ms")]
    pub read: Duration,
    #[serde(rename = "write_ms", with = "duration_ms")]
    pub write: Duration,
}

impl TimeoutSet {
    /// Default bound for one race attempt: connect then read.
    pub fn attempt_budget(&self) -> Duration {
        self.connect + self.read
    }

    /// Bound for a single request/response exchange.
    pub fn request_budget(&self) -> Duration {
        self.write + self.read
    }
}

/// Everything derived from one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityProfile {
    pub tier: NetworkQualityTier,
    pub timeouts: TimeoutSet,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}
