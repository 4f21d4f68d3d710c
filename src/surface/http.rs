use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use tracing::debug;
use url::Url;

use super::{AcquisitionRequest, AttemptVerdict, InteractionSurface};
use crate::config::SurfaceConfig;
use crate::contention::{ContentionDetector, ContentionSignal, RetryHandle, Severity};
use crate::error::{AcquireError, KairosError};

pub const BODY_PREVIEW_CHARS: usize = 300;

/// [`InteractionSurface`] over plain HTTP.
///
/// Acquisition POSTs the payload as JSON to `acquire_url`; a contention response may name a
/// retry endpoint in its `Location` header, which becomes the retry handle.
#[derive(Debug, Clone)]
pub struct HttpSurface {
    client: reqwest::Client,
    acquire_url: Url,
    status_url: Url,
    detector: ContentionDetector,
}

impl HttpSurface {
    pub fn new(
        client: reqwest::Client,
        acquire_url: Url,
        status_url: Option<Url>,
        detector: ContentionDetector,
    ) -> Self {
        let status_url = status_url.unwrap_or_else(|| acquire_url.clone());
        Self {
            client,
            acquire_url,
            status_url,
            detector,
        }
    }

    pub fn from_config(client: reqwest::Client, cfg: &SurfaceConfig) -> Result<Self, KairosError> {
        let acquire_url = cfg.acquire_url.clone().ok_or_else(|| {
            KairosError::InvalidConfig("surface.acquire_url is required".to_string())
        })?;
        Ok(Self::new(
            client,
            acquire_url,
            cfg.status_url.clone(),
            ContentionDetector::new(&cfg.contention_keywords),
        ))
    }

    pub fn build_acquire_request(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<reqwest::Request, reqwest::Error> {
        self.client
            .post(self.acquire_url.clone())
            .timeout(request.timeouts.request_budget())
            .header("X-Acquire-Target", request.target.as_str())
            .header("X-Acquire-Attempt", request.attempt.to_string())
            .json(&request.payload)
            .build()
    }

    /// Resolves a `Location` header against the URL that produced it.
    fn retry_handle_from(&self, base: &Url, resp: &reqwest::Response) -> Option<RetryHandle> {
        let raw = resp.headers().get(LOCATION)?.to_str().ok()?;
        let resolved = base.join(raw).ok()?;
        Some(RetryHandle::new(resolved))
    }

    /// Maps a response onto the verdict taxonomy. Contention markers win over a 2xx status.
    pub fn classify(
        &self,
        status: StatusCode,
        body: &str,
        handle: Option<RetryHandle>,
    ) -> AttemptVerdict {
        if let Some(mut signal) = self.detector.classify(Some(status), body) {
            signal.retry_handle = handle;
            return AttemptVerdict::Contention(signal);
        }

        let preview = format!("{:.len$}", body, len = BODY_PREVIEW_CHARS);
        if status.is_success() {
            AttemptVerdict::Success(preview)
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            AttemptVerdict::TransientError(format!("{status}: {preview}"))
        } else if status.is_client_error() {
            AttemptVerdict::Fatal(format!("{status}: {preview}"))
        } else {
            AttemptVerdict::TransientError(format!("unexpected status {status}"))
        }
    }

    /// Only a 2xx page without markers counts as admission; any other status keeps the
    /// poller going at MODERATE.
    fn scan_verdict(
        detector: &ContentionDetector,
        status: StatusCode,
        body: &str,
        handle: Option<RetryHandle>,
    ) -> Option<ContentionSignal> {
        let signal = match detector.classify(Some(status), body) {
            Some(signal) => signal,
            None if status.is_success() => return None,
            None => ContentionSignal::new(Vec::new(), Severity::Moderate, None),
        };
        let signal = ContentionSignal {
            retry_handle: handle,
            ..signal
        };
        debug!(%status, signal = %signal.summary(), "[Surface] Contention still present");
        Some(signal)
    }

    async fn read_body(resp: reqwest::Response) -> String {
        match resp.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("<failed to read body: {e}>"),
        }
    }
}

#[async_trait]
impl InteractionSurface for HttpSurface {
    async fn scan_for_contention(&self) -> Option<ContentionSignal> {
        let resp = match self.client.get(self.status_url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                // An unreachable status page is not evidence of admission.
                debug!(url = %self.status_url, error = %e, "[Surface] Status probe failed");
                return Some(ContentionSignal::new(Vec::new(), Severity::Moderate, None));
            }
        };
        let status = resp.status();
        let handle = self.retry_handle_from(&self.status_url, &resp);
        let body = Self::read_body(resp).await;
        Self::scan_verdict(&self.detector, status, &body, handle)
    }

    async fn invoke_retry_action(&self, handle: Option<&RetryHandle>) -> bool {
        let target = handle
            .and_then(|h| Url::parse(h.as_str()).ok())
            .unwrap_or_else(|| self.acquire_url.clone());
        match self.client.post(target.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                debug!(url = %target, %status, "[Surface] Retry action sent");
                status.is_success()
            }
            Err(e) => {
                debug!(url = %target, error = %e, "[Surface] Retry action failed");
                false
            }
        }
    }

    async fn perform_acquisition_attempt(&self, request: &AcquisitionRequest) -> AttemptVerdict {
        let req = match self.build_acquire_request(request) {
            Ok(req) => req,
            Err(e) => return AttemptVerdict::Fatal(format!("failed to build request: {e}")),
        };

        let resp = match self.client.execute(req).await {
            Ok(resp) => resp,
            Err(e) => {
                return match AcquireError::from(e) {
                    AcquireError::Transient(message) => AttemptVerdict::TransientError(message),
                    other => AttemptVerdict::Fatal(other.to_string()),
                };
            }
        };

        let status = resp.status();
        let handle = self.retry_handle_from(&self.acquire_url, &resp);
        let body = Self::read_body(resp).await;
        let verdict = self.classify(status, &body, handle);
        debug!(
            attempt = request.attempt,
            %status,
            verdict = ?verdict,
            "[Surface] Acquisition response classified"
        );
        verdict
    }
}
