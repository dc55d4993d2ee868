// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::conn::Connection;
use super::registry::Registry;
use std::sync::Arc;
use tracing::debug;

/// Removes a connection from the registry when its handler's scope is exited,
/// whichever way the read loop ended.
pub struct ConnectionGuard {
    registry: Arc<Registry>,
    connection: Arc<Connection>,
}

impl ConnectionGuard {
    pub(crate) fn new(registry: Arc<Registry>, connection: Arc<Connection>) -> Self {
        Self {
            registry,
            connection,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let identity = self.connection.identity();
        debug!(
            "ConnectionGuard dropping, releasing {} after {:?}",
            identity,
            self.connection.age()
        );
        // The prober may have evicted it already.
        if !self.registry.unregister(&self.connection) {
            debug!("{} was not in the registry upon cleanup.", identity);
        }
    }
}
