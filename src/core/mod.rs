// src/core/mod.rs

//! The central module containing the delivery pipeline of EventGate: wire protocol,
//! collector, pipeline queue, worker pool and broker boundary.

pub mod collection;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod publisher;
pub mod tasks;
pub mod worker;

pub use errors::EventGateError;
