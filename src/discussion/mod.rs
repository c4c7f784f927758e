//! Discussion controller for the bounded debate sub-phase.
//!
//! Owns one cancellable timeout per room. Expiry does not mutate any
//! room directly; it feeds a [`TimerEvent`] back into the engine's
//! queue, where the round epoch decides whether the firing is stale.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RoomResult;
use crate::room::types::{ClientId, Room, RoomId, RoomPhase};

/// Scheduled callbacks routed back through the engine queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The discussion window for a room elapsed.
    DiscussionExpired { room_id: RoomId, epoch: u64 },
    /// The inter-round settle delay elapsed; open the next round.
    AdvanceRound { room_id: RoomId, epoch: u64 },
}

/// Manages discussion state on rooms plus the per-room timeout task.
pub struct DiscussionController {
    window: Duration,
    tx: mpsc::UnboundedSender<TimerEvent>,
    timers: HashMap<RoomId, JoinHandle<()>>,
}

impl DiscussionController {
    pub fn new(window: Duration, tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            window,
            tx,
            timers: HashMap::new(),
        }
    }

    /// Enter the discussion phase: record the two required debaters,
    /// reset the round, stamp the deadline, and schedule auto-end.
    pub fn begin(
        &mut self,
        room: &mut Room,
        lowest: &ClientId,
        highest: &ClientId,
    ) -> RoomResult<DateTime<Utc>> {
        room.transition(RoomPhase::Discussion)?;
        room.clear_votes();
        room.discussion_extremes = vec![lowest.clone(), highest.clone()];
        let deadline = Utc::now() + chrono::Duration::milliseconds(self.window.as_millis() as i64);
        room.discussion_deadline = Some(deadline);

        self.cancel(&room.room_id);
        let tx = self.tx.clone();
        let room_id = room.room_id.clone();
        let epoch = room.round_epoch;
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Receiver gone means the engine shut down; nothing to do.
            let _ = tx.send(TimerEvent::DiscussionExpired { room_id, epoch });
        });
        self.timers.insert(room.room_id.clone(), handle);
        debug!(room_id = %room.room_id, epoch, "discussion started");
        Ok(deadline)
    }

    /// Leave the discussion phase and return to voting. Idempotent
    /// with respect to the timer: a missing handle is fine.
    pub fn end(&mut self, room: &mut Room) -> RoomResult<()> {
        self.cancel(&room.room_id);
        room.discussion_extremes.clear();
        room.discussion_deadline = None;
        room.transition(RoomPhase::Voting)?;
        room.clear_votes();
        debug!(room_id = %room.room_id, "discussion ended");
        Ok(())
    }

    /// Abort any pending timeout for a room (room removal included).
    pub fn cancel(&mut self, room_id: &str) {
        if let Some(handle) = self.timers.remove(room_id) {
            handle.abort();
        }
    }

    /// Whether a client may chat right now. Only the two extremes may
    /// speak during discussion; any other phase is unrestricted.
    pub fn may_chat(room: &Room, client_id: &str) -> bool {
        room.phase != RoomPhase::Discussion
            || room.discussion_extremes.iter().any(|id| id == client_id)
    }
}

impl Drop for DiscussionController {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}
