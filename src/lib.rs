pub mod config;
pub mod contention;
pub mod error;
pub mod net;
pub mod quality;
pub mod race;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod surface;
pub mod timesync;
mod utils;

pub use config::Config;
pub use error::{AcquireError, KairosError};
pub use scheduler::{AcquisitionScheduler, RunOutcome, RunReport, RunRequest, SchedulerSettings};
