// Session registry.
//
// Owns every live UE session plus the IMSI index. TEID-based lookup goes
// through the tunnel arena, which records the owning session id per
// control tunnel. Single writer: the engine thread.

use std::collections::HashMap;

use crate::gtp::ImsiKey;

use super::UeSession;

/// Monotonic session identity, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, UeSession>,
    by_imsi: HashMap<ImsiKey, SessionId>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId(self.next_id)
    }

    /// Register a session under its IMSI. The session stays in the index
    /// for its whole lifetime.
    pub fn insert(&mut self, session: UeSession) {
        self.by_imsi.insert(session.imsi, session.id);
        self.sessions.insert(session.id, session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&UeSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut UeSession> {
        self.sessions.get_mut(&id)
    }

    pub fn find_by_imsi(&self, imsi: &ImsiKey) -> Option<SessionId> {
        self.by_imsi.get(imsi).copied()
    }

    /// Temporarily take a session out to run it (disjoint borrows against
    /// the rest of the engine state); put it back with `restore`.
    pub fn take(&mut self, id: SessionId) -> Option<UeSession> {
        self.sessions.remove(&id)
    }

    pub fn restore(&mut self, session: UeSession) {
        self.sessions.insert(session.id, session);
    }

    /// Remove a session for good, clearing the IMSI index entry.
    pub fn remove(&mut self, id: SessionId) -> Option<UeSession> {
        let session = self.sessions.remove(&id)?;
        self.by_imsi.remove(&session.imsi);
        Some(session)
    }

    /// Drop the IMSI index entry for a session that was `take`n and will
    /// not be restored.
    pub fn unregister_imsi(&mut self, imsi: &ImsiKey) {
        self.by_imsi.remove(imsi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeType;
    use crate::session::SessionParams;

    fn params() -> SessionParams {
        SessionParams {
            t3_ms: 1000,
            n3_max: 3,
            dead_call_wait_ms: 5000,
            node_type: NodeType::Mme,
        }
    }

    fn make_session(reg: &mut SessionRegistry, imsi: u64) -> SessionId {
        let id = reg.allocate_id();
        let session = UeSession::new(
            id,
            ImsiKey::from_imsi(imsi),
            &params(),
            "127.0.0.1:2123".parse().unwrap(),
            "127.0.0.1:2124".parse().unwrap(),
        );
        reg.insert(session);
        id
    }

    #[test]
    fn ids_are_monotonic() {
        let mut reg = SessionRegistry::new();
        let a = reg.allocate_id();
        let b = reg.allocate_id();
        assert!(b > a);
    }

    #[test]
    fn insert_indexes_by_imsi() {
        let mut reg = SessionRegistry::new();
        let id = make_session(&mut reg, 262010000000001);

        assert_eq!(reg.find_by_imsi(&ImsiKey::from_imsi(262010000000001)), Some(id));
        assert!(reg.contains(id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_clears_imsi_index() {
        let mut reg = SessionRegistry::new();
        let id = make_session(&mut reg, 1);

        assert!(reg.remove(id).is_some());
        assert_eq!(reg.find_by_imsi(&ImsiKey::from_imsi(1)), None);
        assert!(reg.is_empty());
        assert!(reg.remove(id).is_none());
    }

    #[test]
    fn take_and_restore_keep_imsi_index() {
        let mut reg = SessionRegistry::new();
        let id = make_session(&mut reg, 7);

        let session = reg.take(id).unwrap();
        // session is out, but the IMSI still resolves (it is live)
        assert_eq!(reg.find_by_imsi(&ImsiKey::from_imsi(7)), Some(id));
        assert!(reg.get(id).is_none());

        reg.restore(session);
        assert!(reg.get(id).is_some());
    }
}
