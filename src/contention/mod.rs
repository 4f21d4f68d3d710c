//! Contention signals and the adaptive polling loop entered once one is observed.

mod poller;
mod signal;

pub use poller::{ContentionPoller, ExitReason, PollOutcome, effective_config};
pub use signal::{ContentionDetector, ContentionSignal, RetryHandle, Severity};
