// src/connection/mod.rs

//! Manages duplex client connections: identity, registration, liveness and the
//! per-connection read loop.

mod conn;
mod guard;
mod handler;
mod identity;
pub mod prober;
mod registry;
mod upgrader;

pub use conn::{Connection, FrameReader, FrameSink};
pub use guard::ConnectionGuard;
pub use handler::IngestionHandler;
pub use identity::ConnectionIdentity;
pub use prober::Prober;
pub use registry::Registry;
pub use upgrader::Upgrader;
