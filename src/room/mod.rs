//! Room data model and in-memory registry.

pub mod registry;
pub mod types;

pub use registry::{RoomRegistry, RoomSummary};
pub use types::{
    CastVote, ClientId, Feature, Participant, ResolutionPolicy, Room, RoomConfig, RoomId,
    RoomPhase,
};
