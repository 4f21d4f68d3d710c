mod basic;
mod engine;
mod serde_ms;
mod surface;
mod timing;

pub use basic::BasicConfig;
pub use engine::{PollerConfig, RaceConfig, RaceResolvedConfig, RetryOverrides};
pub(crate) use serde_ms::duration_ms;
pub use surface::SurfaceConfig;
pub use timing::{QualityConfig, ScheduleConfig, TimeSyncConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::KairosError;
use crate::utils::logging::with_pretty_json_debug;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Process-level settings (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Deadline and lead time (see `schedule` table).
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Clock calibration (see `time_sync` table).
    #[serde(default)]
    pub time_sync: TimeSyncConfig,

    /// Network quality probing (see `quality` table).
    #[serde(default)]
    pub quality: QualityConfig,

    /// Race overrides (see `race` table).
    #[serde(default)]
    pub race: RaceConfig,

    /// Retry overrides (see `retry` table).
    #[serde(default)]
    pub retry: RetryOverrides,

    /// Contention polling cadence (see `poller` table).
    #[serde(default)]
    pub poller: PollerConfig,

    /// HTTP interaction surface (see `surface` table).
    #[serde(default)]
    pub surface: SurfaceConfig,
}

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "KAIROS_";

impl Config {
    /// Builds a Figment that merges defaults, the TOML file at `path` (if present) and
    /// `KAIROS_`-prefixed environment variables (`__` separates nested keys).
    pub fn figment(path: &Path) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if path.is_file() {
            figment.merge(Toml::file(path))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates configuration.
    pub fn load(path: &Path) -> Result<Self, KairosError> {
        let cfg: Self = Self::figment(path).extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses configuration from TOML text layered over defaults (no environment).
    pub fn from_toml_str(raw: &str) -> Result<Self, KairosError> {
        let cfg: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(raw))
            .extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Dumps the merged configuration as pretty JSON when debug logging is enabled.
    pub fn log_effective(&self) {
        with_pretty_json_debug(self, |pretty| {
            tracing::debug!(config = %pretty, "Effective configuration");
        });
    }

    pub fn validate(&self) -> Result<(), KairosError> {
        self.poller.validate()?;
        if let Some(0) = self.race.concurrency {
            return Err(KairosError::InvalidConfig(
                "race.concurrency must be > 0".to_string(),
            ));
        }
        self.retry.apply(&crate::retry::RetryPolicy::default()).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::TransportClass;
    use crate::race::RacePolicy;
    use std::time::Duration;

    #[test]
    fn defaults_round_trip_through_figment() {
        let cfg = Config::from_toml_str("").expect("defaults are valid");
        assert_eq!(cfg.basic.loglevel, "info");
        assert_eq!(cfg.poller, PollerConfig::default());
        assert_eq!(cfg.schedule.lead_time, Duration::from_millis(5));
        assert!(cfg.schedule.deadline.is_none());
        assert!(cfg.race.concurrency.is_none());
        assert_eq!(cfg.race.policy, RacePolicy::AwaitAll);
        assert!(!cfg.time_sync.reference_urls.is_empty());
    }

    #[test]
    fn toml_overrides_are_applied() {
        let cfg = Config::from_toml_str(
            r#"
            [schedule]
            deadline = "2026-10-18T04:00:00Z"
            lead_time_ms = 12

            [quality]
            transport = "local"

            [race]
            concurrency = 6
            per_attempt_timeout_ms = 750
            policy = "first_success"

            [retry]
            max_retries = 5
            jitter_factor = 0.0

            [poller]
            max_attempts = 40
            burst_size = 3

            [surface]
            acquire_url = "http://127.0.0.1:9000/acquire"
            contention_keywords = ["hold on"]

            [surface.payload]
            sku = "A-1"
            "#,
        )
        .expect("valid config");

        assert_eq!(cfg.schedule.lead_time, Duration::from_millis(12));
        assert!(cfg.schedule.deadline.is_some());
        assert_eq!(cfg.quality.transport, TransportClass::Local);
        assert_eq!(cfg.race.concurrency, Some(6));
        assert_eq!(cfg.race.per_attempt_timeout, Some(Duration::from_millis(750)));
        assert_eq!(cfg.race.policy, RacePolicy::FirstSuccess);
        assert_eq!(cfg.retry.max_retries, Some(5));
        assert_eq!(cfg.poller.max_attempts, 40);
        assert_eq!(cfg.poller.burst_size, 3);
        assert_eq!(cfg.poller.base_interval, Duration::from_millis(60));
        assert_eq!(cfg.surface.contention_keywords, vec!["hold on".to_string()]);
        assert_eq!(cfg.surface.payload["sku"], "A-1");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml_str("[poller]\nmax_attempts = 0").is_err());
        assert!(Config::from_toml_str("[race]\nconcurrency = 0").is_err());
        assert!(Config::from_toml_str("[retry]\nbackoff_multiplier = 0.5").is_err());
        assert!(Config::from_toml_str("[race]\nbogus = 1").is_err());
        assert!(Config::from_toml_str("[poller]\nburst_size = 10\nprogress_check_interval = 10").is_err());
        assert!(Config::from_toml_str("[poller]\nburst_size = 9\nprogress_check_interval = 10").is_ok());
    }
}
