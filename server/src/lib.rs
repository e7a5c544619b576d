pub mod api;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod net;
pub mod registry;
pub mod room;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use dispatch::{Dispatched, Dispatcher};
pub use engine::{EngineError, SessionEngine};
pub use net::{route_request, PuzzleServer, Route};
pub use registry::ConnectionRegistry;
pub use room::{LeasePolicy, RoomDirectory, RoomEvent};
pub use store::{ImageRepository, KvStore, MemoryStore, SessionRepository, StoreError};
