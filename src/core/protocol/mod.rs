// src/core/protocol/mod.rs

//! Client-facing wire messages and the codecs that carry them.

pub mod codec;
pub mod messages;

pub use codec::{Codec, WireMessage};
pub use messages::{Code, Event, SendEventRequest, SendEventResponse, Status, Timestamp};
