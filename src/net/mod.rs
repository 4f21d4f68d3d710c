//! Outbound HTTP: client construction and the HEAD-based time/latency prober.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONNECTION, DATE, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::BasicConfig;
use crate::error::KairosError;
use crate::quality::LatencyProbe;
use crate::timesync::{ClockSample, TimeReference};

pub const USER_AGENT: &str = concat!("kairos/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared reqwest client honoring the proxy and multiplexing settings.
///
/// Per-request bounds (tier timeouts, probe timeouts) are applied by callers on top of
/// these outer limits.
pub fn build_client(basic: &BasicConfig) -> Result<reqwest::Client, KairosError> {
    let mut headers = HeaderMap::new();
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT);

    if let Some(proxy_url) = basic.proxy.as_ref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }

    if !basic.enable_multiplexing {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    } else {
        builder = builder.http2_adaptive_window(true);
    }

    Ok(builder.default_headers(headers).build()?)
}

/// Sends HEAD requests: the round trip feeds the quality advisor and the `Date` header
/// feeds clock calibration.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn head(&self, endpoint: &Url) -> Result<reqwest::Response, KairosError> {
        Ok(self.client.head(endpoint.clone()).send().await?)
    }
}

/// `Date` carries whole seconds only; sub-second precision comes from intersecting samples
/// taken at different phases of the second.
fn parse_date_header(headers: &HeaderMap) -> Result<DateTime<Utc>, KairosError> {
    let raw = headers
        .get(DATE)
        .and_then(|v| v.to_str().ok())
        .ok_or(KairosError::MissingDateHeader("Date"))?;
    Ok(DateTime::parse_from_rfc2822(raw)?.with_timezone(&Utc))
}

#[async_trait]
impl TimeReference for HttpProber {
    async fn sample(&self, endpoint: &Url) -> Result<ClockSample, KairosError> {
        let sent_at = Utc::now();
        let resp = self.head(endpoint).await?;
        let received_at = Utc::now();
        let stamp = parse_date_header(resp.headers())?;
        Ok(ClockSample::from_whole_second_stamp(sent_at, received_at, stamp))
    }
}

#[async_trait]
impl LatencyProbe for HttpProber {
    async fn round_trip(&self, endpoint: &Url) -> Result<Duration, KairosError> {
        let started = Instant::now();
        self.head(endpoint).await?;
        Ok(started.elapsed())
    }
}
