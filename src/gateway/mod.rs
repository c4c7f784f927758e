//! External collaborator interfaces: transport and persistence.

pub mod persistence;
pub mod transport;

pub use persistence::{JsonFileStore, PersistError, PersistResult, PersistenceGateway};
pub use transport::{Delivery, RecordingTransport, ServerEvent, TransportGateway};
