use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side identifier of one realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-local directory of live connections per authenticated user.
///
/// Invariants:
/// - a connection belongs to at most one user at a time
/// - a user entry exists only while its set is non-empty
///
/// Nothing here is persisted; a restarted process starts empty.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// user_id → live connections
    users: DashMap<String, HashSet<ConnectionId>>,
    /// connection → owning user_id
    owners: DashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Re-registering a connection under a different user moves it.
    pub fn register(&self, user_id: &str, connection: ConnectionId) {
        if let Some(previous) = self.owners.insert(connection.clone(), user_id.to_string()) {
            if previous != user_id {
                self.detach(&previous, &connection);
            }
        }
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(connection);
    }

    /// No-op if the pair was never registered.
    pub fn unregister(&self, user_id: &str, connection: &ConnectionId) {
        self.owners.remove_if(connection, |_, owner| owner == user_id);
        self.detach(user_id, connection);
    }

    /// Empty for offline users.
    pub fn connections(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.users
            .get(user_id)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }

    pub fn owner_of(&self, connection: &ConnectionId) -> Option<String> {
        self.owners.get(connection).map(|o| o.value().clone())
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }

    fn detach(&self, user_id: &str, connection: &ConnectionId) {
        if let Some(mut set) = self.users.get_mut(user_id) {
            set.remove(connection);
        }
        // re-checked under the shard lock so a concurrent register survives
        self.users.remove_if(user_id, |_, set| set.is_empty());
    }
}
