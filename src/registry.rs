//! # Connection Registry
//!
//! Tracks every connected client channel by its connection id. Registration
//! is the gate that enforces the single-provider-per-client invariant: a
//! connection id can hold at most one relay session, so two concurrent
//! provider sessions can never be bound to the same client channel. The
//! registry also caps the number of concurrent relay sessions.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// What the registry records about one connected client channel.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// When the client channel was accepted
    pub connected_at: DateTime<Utc>,
}

/// Registry of active client channels.
///
/// ## Ownership:
/// The registry routes and counts connections; it does not own the relay
/// sessions themselves. Each session is owned exclusively by its client
/// channel's actor.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Active connections mapped by connection id
    connections: HashMap<Uuid, ConnectionEntry>,

    /// Maximum number of concurrent relay sessions allowed
    max_sessions: usize,
}

impl ConnectionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_sessions,
        }
    }

    /// Register a newly accepted client channel.
    ///
    /// ## Returns:
    /// - **Ok(())**: the connection holds its relay session slot
    /// - **Err(message)**: at capacity, or the id is already registered
    ///   (which would mean a second provider session for the same client)
    pub fn register(&mut self, connection_id: Uuid) -> Result<(), String> {
        if self.connections.len() >= self.max_sessions {
            return Err(format!(
                "Maximum concurrent relay sessions ({}) reached",
                self.max_sessions
            ));
        }

        if self.connections.contains_key(&connection_id) {
            return Err(format!(
                "Connection '{}' already has an active relay session",
                connection_id
            ));
        }

        self.connections.insert(
            connection_id,
            ConnectionEntry {
                connected_at: Utc::now(),
            },
        );

        Ok(())
    }

    /// Remove a client channel (cleanup on disconnect).
    ///
    /// Safe to call for ids that were never registered or were already
    /// removed; returns whether an entry was actually present.
    pub fn deregister(&mut self, connection_id: &Uuid) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn contains(&self, connection_id: &Uuid) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Ids of all active connections (for status reporting).
    pub fn active_connection_ids(&self) -> Vec<Uuid> {
        self.connections.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let mut registry = ConnectionRegistry::new(4);
        let id = Uuid::new_v4();

        assert!(registry.register(id).is_ok());
        assert!(registry.contains(&id));
        assert_eq!(registry.active_count(), 1);

        assert!(registry.deregister(&id));
        assert!(!registry.contains(&id));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let mut registry = ConnectionRegistry::new(4);
        let id = Uuid::new_v4();

        assert!(registry.register(id).is_ok());
        // A second provider session for the same client channel is never allowed
        assert!(registry.register(id).is_err());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut registry = ConnectionRegistry::new(2);

        assert!(registry.register(Uuid::new_v4()).is_ok());
        assert!(registry.register(Uuid::new_v4()).is_ok());
        assert!(registry.register(Uuid::new_v4()).is_err());

        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_deregister_unknown_is_a_noop() {
        let mut registry = ConnectionRegistry::new(2);
        assert!(!registry.deregister(&Uuid::new_v4()));
    }

    #[test]
    fn test_slot_frees_after_deregister() {
        let mut registry = ConnectionRegistry::new(1);
        let first = Uuid::new_v4();

        assert!(registry.register(first).is_ok());
        assert!(registry.register(Uuid::new_v4()).is_err());

        registry.deregister(&first);
        assert!(registry.register(Uuid::new_v4()).is_ok());
    }
}
