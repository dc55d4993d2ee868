// src/connection/identity.rs

use axum::http::HeaderMap;
use std::fmt;
use uuid::Uuid;

/// Who a connection belongs to. Assigned once at upgrade time and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub id: String,
    pub group: String,
}

impl ConnectionIdentity {
    pub fn new(id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
        }
    }

    /// Reads the identity from the configured headers. A missing or empty id header
    /// falls back to a generated id; a missing group falls back to `default_group`.
    pub fn from_headers(
        headers: &HeaderMap,
        id_header: &str,
        group_header: &str,
        default_group: &str,
    ) -> Self {
        let id = header_value(headers, id_header).unwrap_or_else(|| Uuid::new_v4().to_string());
        let group = header_value(headers, group_header).unwrap_or_else(|| default_group.to_string());
        Self { id, group }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id={}, group={}]", self.id, self.group)
    }
}
