//! Session layer: inbound commands and the engine that applies them.

pub mod command;
pub mod engine;

pub use command::{ClientCommand, Command};
pub use engine::{EngineConfig, SessionEngine};
