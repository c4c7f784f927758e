//! Inbound commands driving the session engine.

use serde::{Deserialize, Serialize};

use crate::room::types::{ClientId, ResolutionPolicy, RoomId};

/// A command together with the client that issued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCommand {
    pub client: ClientId,
    #[serde(flatten)]
    pub command: Command,
}

/// Participant actions, one variant per inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Open a new room; the issuer becomes creator and first member.
    CreateRoom {
        room_id: RoomId,
        capacity: usize,
        display_name: String,
        #[serde(default)]
        policy: ResolutionPolicy,
        backlog: Vec<String>,
    },
    /// Join an existing room below capacity.
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },
    /// Cast (or re-cast) a vote for the round in progress.
    Vote { room_id: RoomId, value: String },
    /// Chat; restricted to the extremes during discussion.
    SendMessage { room_id: RoomId, text: String },
    /// Creator-only early end of a discussion.
    ForceEndDiscussion { room_id: RoomId },
    /// Restore a paused session from its snapshot.
    LoadGame {
        room_id: RoomId,
        display_name: String,
    },
    /// Request the current discovery list.
    ListRooms,
    /// The client's connection dropped.
    Disconnect,
}
