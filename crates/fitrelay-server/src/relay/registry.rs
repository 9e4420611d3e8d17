//! Connection registry.
//!
//! Stores every live connection with its role and session metadata, keyed
//! by the transport-assigned connection ID. Owned by the relay event loop,
//! so it needs no locking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Transport-assigned connection identifier, unique for the process lifetime.
pub type ConnectionId = u64;

/// What a connection has identified itself as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Connected, no handshake or offer seen yet.
    Unknown,
    /// The pose-analysis process.
    Privileged,
    /// A browser client.
    Ordinary,
}

/// A registered connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub id: ConnectionId,
    pub role: PeerRole,
    /// Exercise selected by the client, from its last offer or change.
    pub exercise_type: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Fields merged into an existing entry by [`ConnectionRegistry::set_metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPatch {
    pub role: Option<PeerRole>,
    pub exercise_type: Option<String>,
}

impl PeerPatch {
    pub fn role(role: PeerRole) -> Self {
        Self {
            role: Some(role),
            exercise_type: None,
        }
    }

    pub fn with_exercise(mut self, exercise_type: Option<&str>) -> Self {
        self.exercise_type = exercise_type.map(str::to_string);
        self
    }
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: BTreeMap<ConnectionId, PeerEntry>,
    /// Bumped on every mutation.
    revision: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with role `Unknown`. A reused ID overwrites the old entry.
    pub fn register(&mut self, id: ConnectionId) {
        let entry = PeerEntry {
            id,
            role: PeerRole::Unknown,
            exercise_type: None,
            connected_at: Utc::now(),
        };
        if self.peers.insert(id, entry).is_some() {
            debug!(conn_id = id, "connection id reused, entry replaced");
        }
        self.revision += 1;
    }

    /// Remove a connection. Absent IDs are ignored.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<PeerEntry> {
        let removed = self.peers.remove(&id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Merge `patch` into an existing entry. Returns `false` if the peer is gone.
    pub fn set_metadata(&mut self, id: ConnectionId, patch: PeerPatch) -> bool {
        match self.peers.get_mut(&id) {
            Some(entry) => {
                if let Some(role) = patch.role {
                    entry.role = role;
                }
                if let Some(exercise_type) = patch.exercise_type {
                    entry.exercise_type = Some(exercise_type);
                }
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PeerEntry> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Changes whenever an entry is added, removed, or patched.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All entries, ordered by connection ID.
    pub fn all(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    /// IDs of every connection except `excluded`.
    pub fn ids_except(&self, excluded: ConnectionId) -> Vec<ConnectionId> {
        self.peers
            .keys()
            .copied()
            .filter(|id| *id != excluded)
            .collect()
    }
}
