//! Best-effort reporting of scheduler stage transitions.

mod board;

pub use board::{DEFAULT_HISTORY, StatusBoardHandle, StatusBoardMessage};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::scheduler::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub stage: Stage,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Receiver of status records. `emit` must neither block nor fail the caller.
pub trait StatusSink: Send + Sync {
    fn emit(&self, record: StatusRecord);
}

/// Writes records to the log and nowhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, record: StatusRecord) {
        info!(stage = %record.stage, message = %record.message, "[Status] {}", record.stage);
    }
}

/// Forwards records into a bounded channel; records are dropped while the channel is full
/// or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatusRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StatusRecord>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, record: StatusRecord) {
        if let Err(e) = self.tx.try_send(record) {
            debug!(error = %e, "[Status] Record dropped");
        }
    }
}
