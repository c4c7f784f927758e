//! Real-time collaborative estimation sessions.
//!
//! Teams estimate a backlog of features together: everyone in a room
//! votes on the current feature, a configurable policy turns the
//! round into an estimate, and disagreements trigger a time-boxed
//! discussion between the two extreme voters. Sessions can pause on a
//! unanimous pause card and resume later from a JSON snapshot.
//!
//! The [`session::SessionEngine`] owns all room state and consumes a
//! single serialized command queue; transport and persistence are
//! pluggable via the [`gateway`] traits.

pub mod config;
pub mod discussion;
pub mod error;
pub mod gateway;
pub mod resolver;
pub mod room;
pub mod session;

pub use error::{RoomError, RoomResult};
pub use gateway::{JsonFileStore, PersistenceGateway, ServerEvent, TransportGateway};
pub use resolver::{resolve, Decision};
pub use room::registry::{RoomRegistry, RoomSummary};
pub use room::types::{ResolutionPolicy, Room, RoomPhase};
pub use session::{ClientCommand, Command, EngineConfig, SessionEngine};
