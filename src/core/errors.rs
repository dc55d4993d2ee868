// src/core/errors.rs

//! Defines the primary error type for the ingestion pipeline.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a connection or batch can hit
/// between the upgrade and the hand-off to the worker pool.
#[derive(Error, Debug, Clone)]
pub enum EventGateError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    // --- Connection-fatal ---
    /// The registry already holds its configured maximum number of connections.
    #[error("max connection limit reached ({max})")]
    CapacityExceeded { max: usize },

    /// A connection with the same identity is already registered.
    #[error("duplicate connection for {0}")]
    DuplicateConnection(String),

    /// The peer closed the connection (close frame, going away, abnormal closure).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("write deadline exceeded")]
    WriteTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    // --- Request-recoverable ---
    #[error("{0}")]
    Decode(String),

    #[error("cannot serialize response: {0}")]
    Encode(String),

    // --- Capacity / backpressure ---
    /// The pipeline queue no longer accepts batches (the worker pool is draining).
    #[error("pipeline queue is closed")]
    QueueClosed,

    /// The caller's context was cancelled while waiting for queue space.
    #[error("collect cancelled")]
    Cancelled,

    /// The bounded wait for queue space elapsed.
    #[error("timed out waiting for pipeline queue space")]
    CollectTimeout,
}

impl EventGateError {
    /// Returns true for the expected ways a peer ends a session.
    pub fn is_close_error(&self) -> bool {
        matches!(self, EventGateError::ConnectionClosed(_))
    }

    /// The `reason` label recorded when a read terminates the connection.
    pub fn read_failure_reason(&self) -> &'static str {
        if self.is_close_error() {
            "closeerror"
        } else {
            "unknown"
        }
    }
}

impl From<std::io::Error> for EventGateError {
    fn from(e: std::io::Error) -> Self {
        EventGateError::Io(Arc::new(e))
    }
}

impl From<axum::Error> for EventGateError {
    fn from(e: axum::Error) -> Self {
        EventGateError::Transport(e.to_string())
    }
}

impl From<prost::DecodeError> for EventGateError {
    fn from(e: prost::DecodeError) -> Self {
        EventGateError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for EventGateError {
    fn from(e: serde_json::Error) -> Self {
        EventGateError::Decode(e.to_string())
    }
}
