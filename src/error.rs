//! Error taxonomy for room and session operations.
//!
//! Every failure here is reported to the originating client only and
//! never tears down the room; see the engine for delivery rules.

use thiserror::Error;

/// Result type alias for room/session operations.
pub type RoomResult<T> = Result<T, RoomError>;

/// Errors surfaced to a single requesting client.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("a room named '{0}' already exists")]
    DuplicateRoom(String),

    #[error("room '{0}' does not exist")]
    RoomNotFound(String),

    #[error("participant '{0}' is not in the room")]
    ParticipantNotFound(String),

    #[error("room '{0}' is full")]
    CapacityExceeded(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("snapshot for '{room_id}' is malformed: {detail}")]
    MalformedSnapshot { room_id: String, detail: String },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl RoomError {
    /// Machine-readable code used in outbound error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRoom(_) => "duplicate_room",
            Self::RoomNotFound(_) => "room_not_found",
            Self::ParticipantNotFound(_) => "participant_not_found",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::Permission(_) => "permission",
            Self::Precondition(_) => "precondition",
            Self::MalformedSnapshot { .. } => "malformed_snapshot",
            Self::Persistence(_) => "persistence",
        }
    }
}
