// src/core/tasks/mod.rs

//! Long-running background tasks that support the server, outside the
//! per-connection and per-worker paths.

pub mod connection_metrics;
