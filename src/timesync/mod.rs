//! Clock calibration against external time references and precise deadline waits.

mod clock;
mod reference;

pub use clock::{ClockSyncState, TimeSync, WaitReport};
pub use reference::{ClockSample, TimeReference};
