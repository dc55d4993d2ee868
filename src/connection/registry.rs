// src/connection/registry.rs

//! The table of live connections, keyed by identity and grouped by `group`.

use super::conn::Connection;
use super::identity::ConnectionIdentity;
use crate::core::EventGateError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionIdentity, Weak<Connection>>,
    per_group: HashMap<String, usize>,
}

impl RegistryInner {
    fn remove(&mut self, identity: &ConnectionIdentity) -> bool {
        if self.connections.remove(identity).is_none() {
            return false;
        }
        if let Some(count) = self.per_group.get_mut(&identity.group) {
            *count -= 1;
            if *count == 0 {
                self.per_group.remove(&identity.group);
            }
        }
        true
    }
}

/// Thread-safe registry of live connections.
///
/// The registry never owns a connection: it stores weak references, and the handler
/// task that owns the connection is responsible for calling [`Registry::remove`]
/// on teardown. Group counts are kept next to the map so that aggregate reporting
/// costs one entry per group rather than one per connection.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    max_connections: usize,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Registers a connection under its identity.
    ///
    /// Fails with `CapacityExceeded` when the ceiling is reached and with
    /// `DuplicateConnection` when the identity is already registered. On failure the
    /// registry is left unchanged.
    pub fn add(&self, connection: &Arc<Connection>) -> Result<(), EventGateError> {
        let identity = connection.identity();
        let mut inner = self.inner.write();
        if inner.connections.len() >= self.max_connections {
            return Err(EventGateError::CapacityExceeded {
                max: self.max_connections,
            });
        }
        if inner.connections.contains_key(identity) {
            return Err(EventGateError::DuplicateConnection(identity.to_string()));
        }
        inner
            .connections
            .insert(identity.clone(), Arc::downgrade(connection));
        *inner.per_group.entry(identity.group.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// Removes a connection. Returns false if the identity was not registered.
    pub fn remove(&self, identity: &ConnectionIdentity) -> bool {
        self.inner.write().remove(identity)
    }

    /// Removes `connection` only if it is the one registered under its identity, so a
    /// late teardown never evicts a newer connection that reused the same identity.
    ///
    /// The check and the removal happen under one write lock.
    pub fn unregister(&self, connection: &Arc<Connection>) -> bool {
        let identity = connection.identity();
        let mut inner = self.inner.write();
        let is_same = inner
            .connections
            .get(identity)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(connection)));
        is_same && inner.remove(identity)
    }

    /// Looks up a live connection.
    pub fn get(&self, identity: &ConnectionIdentity) -> Option<Arc<Connection>> {
        self.inner
            .read()
            .connections
            .get(identity)
            .and_then(Weak::upgrade)
    }

    pub fn contains(&self, identity: &ConnectionIdentity) -> bool {
        self.inner.read().connections.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered connections in each group.
    pub fn total_connections_per_group(&self) -> HashMap<String, usize> {
        self.inner.read().per_group.clone()
    }

    /// A snapshot of every connection that is still alive.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .read()
            .connections
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}
