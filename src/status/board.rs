use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::VecDeque;
use tracing::debug;

use super::{StatusRecord, StatusSink};
use crate::error::KairosError;

pub const DEFAULT_HISTORY: usize = 64;

#[derive(Debug)]
pub enum StatusBoardMessage {
    /// Append a record, evicting the oldest once the history is full.
    Record(StatusRecord),
    Latest(RpcReplyPort<Option<StatusRecord>>),
    History(RpcReplyPort<Vec<StatusRecord>>),
}

/// Handle for the status board actor. Recording is a cast and never waits on the actor.
#[derive(Clone)]
pub struct StatusBoardHandle {
    actor: ActorRef<StatusBoardMessage>,
}

impl StatusBoardHandle {
    /// Spawns an unnamed board keeping at most `capacity` records.
    pub async fn spawn(capacity: usize) -> Result<Self, KairosError> {
        let (actor, _jh) = Actor::spawn(None, StatusBoard, capacity.max(1))
            .await
            .map_err(|e| KairosError::RactorError(format!("StatusBoard spawn failed: {e}")))?;
        Ok(Self { actor })
    }

    pub async fn latest(&self) -> Result<Option<StatusRecord>, KairosError> {
        ractor::call!(self.actor, StatusBoardMessage::Latest)
            .map_err(|e| KairosError::RactorError(format!("Latest RPC failed: {e}")))
    }

    /// Oldest first.
    pub async fn history(&self) -> Result<Vec<StatusRecord>, KairosError> {
        ractor::call!(self.actor, StatusBoardMessage::History)
            .map_err(|e| KairosError::RactorError(format!("History RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

impl StatusSink for StatusBoardHandle {
    fn emit(&self, record: StatusRecord) {
        let _ = ractor::cast!(self.actor, StatusBoardMessage::Record(record));
    }
}

struct StatusBoardState {
    history: VecDeque<StatusRecord>,
    capacity: usize,
}

struct StatusBoard;

#[ractor::async_trait]
impl Actor for StatusBoard {
    type Msg = StatusBoardMessage;
    type State = StatusBoardState;
    type Arguments = usize;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        capacity: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(StatusBoardState {
            history: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            StatusBoardMessage::Record(record) => {
                if state.history.len() == state.capacity {
                    state.history.pop_front();
                }
                debug!(stage = %record.stage, "[StatusBoard] Recorded");
                state.history.push_back(record);
            }
            StatusBoardMessage::Latest(rp) => {
                let _ = rp.send(state.history.back().cloned());
            }
            StatusBoardMessage::History(rp) => {
                let _ = rp.send(state.history.iter().cloned().collect());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Stage;

    #[tokio::test]
    async fn keeps_bounded_history_and_latest_stage() {
        let board = StatusBoardHandle::spawn(3).await.unwrap();
        assert!(board.latest().await.unwrap().is_none());

        for (stage, message) in [
            (Stage::Init, "init"),
            (Stage::SyncTime, "sync"),
            (Stage::WaitDeadline, "wait"),
            (Stage::RaceAcquire, "race"),
        ] {
            board.emit(StatusRecord::new(stage, message));
        }

        let history = board.history().await.unwrap();
        let stages: Vec<_> = history.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::SyncTime, Stage::WaitDeadline, Stage::RaceAcquire]);
        assert_eq!(board.latest().await.unwrap().unwrap().message, "race");

        board.stop();
    }
}
