use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::serde_ms::duration_ms;
use crate::quality::TransportClass;

/// When to fire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Publish instant (RFC 3339). Unset means "fire as soon as the clock is synced".
    /// TOML: `schedule.deadline`. Example: `2026-10-18T12:00:00+08:00`.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,

    /// How far ahead of the deadline the wait releases control, compensating dispatch latency.
    /// TOML: `schedule.lead_time_ms`. Default: `5`.
    #[serde(rename = "lead_time_ms", default = "default_lead_time", with = "duration_ms")]
    pub lead_time: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            lead_time: default_lead_time(),
        }
    }
}

/// Clock calibration against HTTP time references.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeSyncConfig {
    /// Endpoints sampled for round-trip timing and their `Date` header.
    /// TOML: `time_sync.reference_urls`.
    #[serde(default = "default_reference_urls")]
    pub reference_urls: Vec<Url>,

    /// Bound on a single reference sample.
    /// TOML: `time_sync.sample_timeout_ms`. Default: `2000`.
    #[serde(rename = "sample_timeout_ms", default = "default_sample_timeout", with = "duration_ms")]
    pub sample_timeout: Duration,

    /// Width of the final window handled by short sleeps instead of one coarse sleep.
    /// TOML: `time_sync.fine_window_ms`. Default: `50`.
    #[serde(rename = "fine_window_ms", default = "default_fine_window", with = "duration_ms")]
    pub fine_window: Duration,

    /// Below this remaining time the wait busy-yields instead of sleeping.
    /// TOML: `time_sync.spin_threshold_ms`. Default: `2`.
    #[serde(rename = "spin_threshold_ms", default = "default_spin_threshold", with = "duration_ms")]
    pub spin_threshold: Duration,

    /// An accurate state younger than this is reused by `check_sync_status`.
    /// TOML: `time_sync.resync_interval_ms`. Default: `300000`.
    #[serde(rename = "resync_interval_ms", default = "default_resync_interval", with = "duration_ms")]
    pub resync_interval: Duration,

    /// Mean round-trip time above which a measurement is flagged inaccurate.
    /// TOML: `time_sync.accuracy_threshold_ms`. Default: `500`.
    #[serde(rename = "accuracy_threshold_ms", default = "default_accuracy_threshold", with = "duration_ms")]
    pub accuracy_threshold: Duration,

    /// Sampling passes over all references per sync. Passes are staggered so whole-second
    /// `Date` stamps land at different phases and narrow the offset bound.
    /// TOML: `time_sync.rounds`. Default: `5`.
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Pause between sampling passes; keep it off any divisor of one second.
    /// TOML: `time_sync.round_spacing_ms`. Default: `210`.
    #[serde(rename = "round_spacing_ms", default = "default_round_spacing", with = "duration_ms")]
    pub round_spacing: Duration,

    /// Largest remaining offset uncertainty (half-width) a state may carry and still be
    /// flagged accurate. TOML: `time_sync.max_uncertainty_ms`. Default: `150`.
    #[serde(rename = "max_uncertainty_ms", default = "default_max_uncertainty", with = "duration_ms")]
    pub max_uncertainty: Duration,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            reference_urls: default_reference_urls(),
            sample_timeout: default_sample_timeout(),
            fine_window: default_fine_window(),
            spin_threshold: default_spin_threshold(),
            resync_interval: default_resync_interval(),
            accuracy_threshold: default_accuracy_threshold(),
            rounds: default_rounds(),
            round_spacing: default_round_spacing(),
            max_uncertainty: default_max_uncertainty(),
        }
    }
}

/// Network quality probing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityConfig {
    /// Endpoints whose round-trip latency is averaged (2-3 recommended).
    /// TOML: `quality.probe_urls`.
    #[serde(default = "default_probe_urls")]
    pub probe_urls: Vec<Url>,

    /// Transport the host is attached through; only `local` can reach the EXCELLENT tier.
    /// TOML: `quality.transport`. Default: `unknown`.
    #[serde(default)]
    pub transport: TransportClass,

    /// Bound on one latency probe.
    /// TOML: `quality.probe_timeout_ms`. Default: `3000`.
    #[serde(rename = "probe_timeout_ms", default = "default_probe_timeout", with = "duration_ms")]
    pub probe_timeout: Duration,

    /// Latency assumed when no probe resolves.
    /// TOML: `quality.default_latency_ms`. Default: `200`.
    #[serde(rename = "default_latency_ms", default = "default_latency", with = "duration_ms")]
    pub default_latency: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            probe_urls: default_probe_urls(),
            transport: TransportClass::default(),
            probe_timeout: default_probe_timeout(),
            default_latency: default_latency(),
        }
    }
}

fn parse_urls(raw: &[&str]) -> Vec<Url> {
    raw.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

fn default_lead_time() -> Duration {
    Duration::from_millis(5)
}

fn default_reference_urls() -> Vec<Url> {
    parse_urls(&[
        "https://www.cloudflare.com/",
        "https://www.google.com/",
        "https://www.apple.com/",
    ])
}

fn default_sample_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_fine_window() -> Duration {
    Duration::from_millis(50)
}

fn default_spin_threshold() -> Duration {
    Duration::from_millis(2)
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_accuracy_threshold() -> Duration {
    Duration::from_millis(500)
}

fn default_rounds() -> usize {
    5
}

fn default_round_spacing() -> Duration {
    Duration::from_millis(210)
}

fn default_max_uncertainty() -> Duration {
    Duration::from_millis(150)
}

fn default_probe_urls() -> Vec<Url> {
    parse_urls(&["https://www.cloudflare.com/", "https://www.google.com/"])
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_latency() -> Duration {
    Duration::from_millis(200)
}
