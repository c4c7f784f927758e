//! Transport gateway: delivery of state-change notifications.
//!
//! The engine only knows broadcast/unicast; the actual wire (socket
//! fan-out, stdio lines in the bundled binary) lives behind this
//! trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::room::registry::RoomSummary;
use crate::room::types::{ClientId, Feature, Room, RoomId};

/// Outbound events, one variant per notification the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Creation acknowledged (to the creator only).
    RoomCreated { room_id: RoomId },
    /// Join acknowledged (to the joiner only).
    RoomJoined { room_id: RoomId },
    /// Discovery list; re-broadcast on every membership change.
    AvailableRooms { rooms: Vec<RoomSummary> },
    /// Display names of everyone in the room.
    UpdatePlayers { names: Vec<String> },
    /// A voting round opened for this feature.
    StartVoting { feature: Feature },
    /// The round closed with an estimate.
    FeatureEstimated { feature: Feature, value: String },
    /// The round must be re-run on the same feature.
    Revote { feature: Feature, message: String },
    /// Sent to each extreme voter: you must debate.
    StartDiscussion {
        message: String,
        lowest_value: f64,
        highest_value: f64,
    },
    /// Room-wide: a debate is in progress. Carries the creator id so
    /// only the creator's client offers early termination.
    DiscussionStarted {
        message: String,
        lowest_value: f64,
        highest_value: f64,
        creator_id: ClientId,
    },
    /// Chat relay.
    ReceiveMessage { sender: String, text: String },
    /// All backlog items estimated.
    GameFinished { backlog: Vec<Feature> },
    /// Unanimous pause; a snapshot was taken.
    GamePaused { message: String },
    /// A snapshot was restored (to the loading client only).
    GameLoaded { room: Box<Room> },
    /// Request rejected; never broadcast room-wide.
    Error { code: String, message: String },
}

/// Delivery capability required by the session engine.
#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// Deliver to every participant of a room.
    async fn broadcast(&self, room_id: &str, event: ServerEvent);

    /// Deliver to a single client.
    async fn unicast(&self, client_id: &str, event: ServerEvent);

    /// Deliver to every connected client (room discovery updates).
    async fn broadcast_all(&self, event: ServerEvent);
}

/// Addressing of one recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Room(RoomId),
    Client(ClientId),
    All,
}

/// In-memory transport that records deliveries in order. Used by the
/// test suites; production adapters implement [`TransportGateway`]
/// against a real wire.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<(Delivery, ServerEvent)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn deliveries(&self) -> Vec<(Delivery, ServerEvent)> {
        self.log.lock().expect("transport log poisoned").clone()
    }

    /// Events delivered to one client, in order.
    pub fn sent_to(&self, client_id: &str) -> Vec<ServerEvent> {
        self.deliveries()
            .into_iter()
            .filter_map(|(target, ev)| match target {
                Delivery::Client(id) if id == client_id => Some(ev),
                _ => None,
            })
            .collect()
    }

    /// Events broadcast to one room, in order.
    pub fn sent_to_room(&self, room_id: &str) -> Vec<ServerEvent> {
        self.deliveries()
            .into_iter()
            .filter_map(|(target, ev)| match target {
                Delivery::Room(id) if id == room_id => Some(ev),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().expect("transport log poisoned").clear();
    }
}

#[async_trait]
impl TransportGateway for RecordingTransport {
    async fn broadcast(&self, room_id: &str, event: ServerEvent) {
        self.log
            .lock()
            .expect("transport log poisoned")
            .push((Delivery::Room(room_id.to_string()), event));
    }

    async fn unicast(&self, client_id: &str, event: ServerEvent) {
        self.log
            .lock()
            .expect("transport log poisoned")
            .push((Delivery::Client(client_id.to_string()), event));
    }

    async fn broadcast_all(&self, event: ServerEvent) {
        self.log
            .lock()
            .expect("transport log poisoned")
            .push((Delivery::All, event));
    }
}
