use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{NetworkQualityTier, QualityProfile, TransportClass};
use crate::config::QualityConfig;
use crate::error::KairosError;

/// Measures round-trip latency to one endpoint.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn round_trip(&self, endpoint: &Url) -> Result<Duration, KairosError>;
}

/// Result of one assessment. Threaded through a run as a value and replaced wholesale on
/// reassessment.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    pub tier: NetworkQualityTier,
    pub latency: Duration,
    pub transport: TransportClass,
    /// Probes that resolved; zero means `latency` is the configured default.
    pub samples: usize,
    pub assessed_at: DateTime<Utc>,
}

impl QualityAssessment {
    pub fn profile(&self) -> QualityProfile {
        self.tier.profile()
    }
}

pub struct QualityAdvisor {
    probe: Arc<dyn LatencyProbe>,
    cfg: QualityConfig,
}

impl QualityAdvisor {
    pub fn new(probe: Arc<dyn LatencyProbe>, cfg: QualityConfig) -> Self {
        Self { probe, cfg }
    }

    /// Probes every endpoint concurrently and classifies the averaged latency.
    pub async fn assess(&self) -> QualityAssessment {
        let probes = self.cfg.probe_urls.iter().map(|endpoint| async move {
            match tokio::time::timeout(self.cfg.probe_timeout, self.probe.round_trip(endpoint))
                .await
            {
                Ok(Ok(rtt)) => Some(rtt),
                Ok(Err(e)) => {
                    debug!(endpoint = %endpoint, error = %e, "[Quality] Probe failed");
                    None
                }
                Err(_) => {
                    debug!(endpoint = %endpoint, timeout = ?self.cfg.probe_timeout, "[Quality] Probe timed out");
                    None
                }
            }
        });
        let samples: Vec<Duration> = join_all(probes).await.into_iter().flatten().collect();

        let latency = mean(&samples).unwrap_or(self.cfg.default_latency);
        let tier = NetworkQualityTier::classify(latency, self.cfg.transport);

        info!(
            tier = %tier,
            latency_ms = latency.as_millis() as u64,
            samples = samples.len(),
            endpoints = self.cfg.probe_urls.len(),
            transport = ?self.cfg.transport,
            "[Quality] Network assessed"
        );

        QualityAssessment {
            tier,
            latency,
            transport: self.cfg.transport,
            samples: samples.len(),
            assessed_at: Utc::now(),
        }
    }

    pub fn derive_config(tier: NetworkQualityTier) -> QualityProfile {
        tier.profile()
    }
}

fn mean(samples: &[Duration]) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total / u32::try_from(samples.len()).unwrap_or(u32::MAX))
}
