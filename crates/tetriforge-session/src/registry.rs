//! The session registry: every client or admin currently admitted.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself. It is a plain `Vec`
//! kept in connect order; the server owns each registry behind a mutex
//! and holds that lock around check-then-add sequences, so the name and
//! connection checks in [`SessionRegistry::add`] and the insert happen
//! atomically from the outside.
//!
//! Lookups are linear scans. Registries hold tens of clients and a handful
//! of admins, so an index would only add bookkeeping.

use std::net::IpAddr;
use std::sync::Arc;

use tetriforge_protocol::ConnectionId;

use crate::{AdminSession, ClientSession, Session, SessionError};

pub type ClientRegistry = SessionRegistry<ClientSession>;
pub type AdminRegistry = SessionRegistry<AdminSession>;

/// Capacity-checked collection of sessions.
#[derive(Debug)]
pub struct SessionRegistry<T: Session> {
    sessions: Vec<Arc<T>>,
    capacity: usize,
}

impl<T: Session> SessionRegistry<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Admits a session.
    ///
    /// # Errors
    /// - [`SessionError::TooManySessions`] when the registry is full
    /// - [`SessionError::DuplicateConnection`] when the connection already
    ///   has a session
    /// - [`SessionError::NameTaken`] when the name is used (case-insensitive)
    pub fn add(&mut self, session: Arc<T>) -> Result<(), SessionError> {
        if self.sessions.len() >= self.capacity {
            return Err(SessionError::TooManySessions(self.capacity));
        }
        if self.by_connection(session.connection()).is_some() {
            return Err(SessionError::DuplicateConnection(session.connection()));
        }
        if self.by_name(session.name()).is_some() {
            return Err(SessionError::NameTaken(session.name().to_owned()));
        }
        self.sessions.push(session);
        Ok(())
    }

    /// Removes the session bound to `connection`.
    pub fn remove(&mut self, connection: ConnectionId) -> Option<Arc<T>> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.connection() == connection)?;
        Some(self.sessions.remove(index))
    }

    pub fn by_id(&self, id: T::Id) -> Option<Arc<T>> {
        self.sessions.iter().find(|s| s.id() == id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<T>> {
        self.sessions
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn by_connection(&self, connection: ConnectionId) -> Option<Arc<T>> {
        self.sessions
            .iter()
            .find(|s| s.connection() == connection)
            .cloned()
    }

    /// First session connected from `address`.
    pub fn by_address(&self, address: IpAddr) -> Option<Arc<T>> {
        self.sessions
            .iter()
            .find(|s| s.address() == address)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.sessions.iter()
    }

    /// Cloned handles, for work that must happen after the lock is released.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.sessions.clone()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tetriforge_protocol::ClientNotification;
    use tokio::sync::mpsc;

    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, last))
    }

    fn client(conn: u64, name: &str) -> Arc<ClientSession> {
        let (tx, _rx) = mpsc::unbounded_channel::<ClientNotification>();
        Arc::new(ClientSession::new(
            ConnectionId::new(conn),
            Arc::new(tx),
            addr(conn as u8),
            name,
            "",
        ))
    }

    // -- add ----------------------------------------------------------------

    #[test]
    fn test_add_new_session_succeeds() {
        let mut registry = ClientRegistry::new(4);
        registry.add(client(1, "alice")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_add_at_capacity_returns_too_many_sessions() {
        let mut registry = ClientRegistry::new(1);
        registry.add(client(1, "alice")).unwrap();
        assert_eq!(
            registry.add(client(2, "bob")),
            Err(SessionError::TooManySessions(1))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_same_connection_returns_duplicate() {
        let mut registry = ClientRegistry::new(4);
        registry.add(client(1, "alice")).unwrap();
        assert_eq!(
            registry.add(client(1, "bob")),
            Err(SessionError::DuplicateConnection(ConnectionId::new(1)))
        );
    }

    #[test]
    fn test_add_same_name_any_case_returns_name_taken() {
        let mut registry = ClientRegistry::new(4);
        registry.add(client(1, "alice")).unwrap();
        assert!(matches!(
            registry.add(client(2, "ALICE")),
            Err(SessionError::NameTaken(_))
        ));
    }

    // -- remove -------------------------------------------------------------

    #[test]
    fn test_remove_returns_removed_session() {
        let mut registry = ClientRegistry::new(4);
        let alice = client(1, "alice");
        registry.add(Arc::clone(&alice)).unwrap();

        let removed = registry.remove(ConnectionId::new(1)).unwrap();
        assert_eq!(removed.id(), alice.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_connection_returns_none() {
        let mut registry = ClientRegistry::new(4);
        assert!(registry.remove(ConnectionId::new(9)).is_none());
    }

    // -- lookups ------------------------------------------------------------

    #[test]
    fn test_lookups_find_by_every_key() {
        let mut registry = ClientRegistry::new(4);
        let alice = client(1, "alice");
        registry.add(Arc::clone(&alice)).unwrap();
        registry.add(client(2, "bob")).unwrap();

        assert_eq!(registry.by_id(alice.id()).unwrap().name(), "alice");
        assert_eq!(registry.by_name("Alice").unwrap().id(), alice.id());
        assert_eq!(
            registry.by_connection(ConnectionId::new(1)).unwrap().id(),
            alice.id()
        );
        assert_eq!(registry.by_address(addr(2)).unwrap().name(), "bob");
    }

    #[test]
    fn test_lookups_no_match_return_none() {
        let registry = ClientRegistry::new(4);
        assert!(registry.by_name("nobody").is_none());
        assert!(registry.by_connection(ConnectionId::new(1)).is_none());
        assert!(registry.by_address(addr(1)).is_none());
    }

    #[test]
    fn test_snapshot_keeps_connect_order_and_clear_empties() {
        let mut registry = ClientRegistry::new(4);
        registry.add(client(1, "alice")).unwrap();
        registry.add(client(2, "bob")).unwrap();

        let names: Vec<_> = registry.snapshot().iter().map(|s| s.name().to_owned()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), 4);
    }
}
