//! The remote service as seen by the engine: acquisition attempts, contention probes and
//! retry actions.

mod http;

pub use http::HttpSurface;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::contention::{ContentionSignal, RetryHandle};
use crate::error::AcquireError;
use crate::quality::TimeoutSet;

/// One acquisition call as issued by a race attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionRequest {
    pub target: String,
    pub payload: Map<String, Value>,
    /// Tier-derived bounds the surface should apply to its own I/O.
    pub timeouts: TimeoutSet,
    /// Launch index within the race.
    pub attempt: usize,
}

impl AcquisitionRequest {
    pub fn new(target: impl Into<String>, payload: Map<String, Value>, timeouts: TimeoutSet) -> Self {
        Self {
            target: target.into(),
            payload,
            timeouts,
            attempt: 0,
        }
    }

    /// Same request tagged with a race launch index.
    pub fn for_attempt(&self, attempt: usize) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// Tagged outcome of one acquisition attempt. Contention is a value, not an error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptVerdict {
    Success(String),
    Contention(ContentionSignal),
    TransientError(String),
    Fatal(String),
}

impl AttemptVerdict {
    pub fn into_result(self) -> Result<String, AcquireError> {
        match self {
            AttemptVerdict::Success(message) => Ok(message),
            AttemptVerdict::Contention(signal) => Err(AcquireError::Contention(signal)),
            AttemptVerdict::TransientError(message) => Err(AcquireError::Transient(message)),
            AttemptVerdict::Fatal(message) => Err(AcquireError::Fatal(message)),
        }
    }
}

#[async_trait]
pub trait InteractionSurface: Send + Sync {
    /// Current contention markers, or `None` once the resource is reachable.
    async fn scan_for_contention(&self) -> Option<ContentionSignal>;

    /// Refreshes a possibly stale handle before a retry action. Surfaces whose handles never
    /// go stale can keep the default.
    async fn resolve_retry_handle(&self, previous: Option<&RetryHandle>) -> Option<RetryHandle> {
        previous.cloned()
    }

    /// Performs one retry/acknowledge action; `true` if the action itself reported success.
    async fn invoke_retry_action(&self, handle: Option<&RetryHandle>) -> bool;

    async fn perform_acquisition_attempt(&self, request: &AcquisitionRequest) -> AttemptVerdict;
}
