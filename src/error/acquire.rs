use std::time::Duration;
use thiserror::Error as ThisError;

use super::IsRetryable;
use crate::contention::ContentionSignal;
use crate::race::Interrupted;

/// Failure of one acquisition attempt.
///
/// Contention is carried as a value so the scheduler can route it to the poller instead of
/// treating it as a hard failure.
#[derive(Debug, Clone, ThisError)]
pub enum AcquireError {
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Contention signaled ({})", .0.summary())]
    Contention(ContentionSignal),

    #[error("Fatal attempt error: {0}")]
    Fatal(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Attempt cancelled")]
    Cancelled,
}

impl AcquireError {
    pub fn contention(&self) -> Option<&ContentionSignal> {
        match self {
            AcquireError::Contention(signal) => Some(signal),
            _ => None,
        }
    }
}

impl From<Interrupted> for AcquireError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(after) => AcquireError::Timeout(after),
            Interrupted::Cancelled => AcquireError::Cancelled,
        }
    }
}

impl From<reqwest::Error> for AcquireError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            AcquireError::Transient(err.to_string())
        } else {
            AcquireError::Fatal(err.to_string())
        }
    }
}

impl IsRetryable for AcquireError {
    fn is_retryable(&self) -> bool {
        match self {
            AcquireError::Transient(_) | AcquireError::Timeout(_) => true,
            AcquireError::Contention(_) | AcquireError::Fatal(_) | AcquireError::Cancelled => {
                false
            }
        }
    }
}
