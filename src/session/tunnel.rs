// Tunnel, PDN and bearer model.
//
// Control tunnels live in an arena and are addressed by stable handles;
// sessions and PDNs refer to them by id only, so there are no ownership
// cycles. The arena also owns the TEID index the dispatcher routes with,
// and the local TEID allocator shared by control and user plane.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::gtp::teid::TeidPool;

use super::SessionId;

/// EBIs range 5..=15.
pub const EBI_MIN: u8 = 5;
pub const MAX_BEARERS: usize = 11;

pub fn bearer_index(ebi: u8) -> Option<usize> {
    if (EBI_MIN..EBI_MIN + MAX_BEARERS as u8).contains(&ebi) {
        Some((ebi - EBI_MIN) as usize)
    } else {
        None
    }
}

/// Handle into the tunnel arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunId(u32);

/// GTP-C control tunnel. `session` is a back-reference used only for
/// dispatch lookup; it never keeps the session alive.
#[derive(Debug)]
pub struct GtpcTun {
    pub local_teid: u32,
    pub remote_teid: u32,
    pub local_ep: SocketAddr,
    pub peer_ep: SocketAddr,
    pub ref_count: u32,
    pub session: SessionId,
}

/// A bearer within a PDN; carries the local user-plane TEID stamped into
/// outgoing Bearer Context IEs.
#[derive(Debug, Clone, Copy)]
pub struct GtpBearer {
    pub ebi: u8,
    pub uplane_local_teid: u32,
}

/// PDN connection: a control tunnel handle plus the set of bearers (as an
/// EBI bitmask) attached through this PDN.
#[derive(Debug)]
pub struct GtpcPdn {
    pub tun: TunId,
    pub bearer_mask: u16,
}

impl GtpcPdn {
    pub fn new(tun: TunId) -> Self {
        Self { tun, bearer_mask: 0 }
    }

    pub fn mark_bearer(&mut self, ebi: u8) {
        if let Some(idx) = bearer_index(ebi) {
            self.bearer_mask |= 1 << idx;
        }
    }

    pub fn has_bearer(&self, ebi: u8) -> bool {
        bearer_index(ebi).is_some_and(|idx| self.bearer_mask & (1 << idx) != 0)
    }
}

#[derive(Debug)]
pub struct TunnelArena {
    tunnels: HashMap<TunId, GtpcTun>,
    by_local_teid: HashMap<u32, TunId>,
    teids: TeidPool,
    next_id: u32,
    max_tunnels: usize,
}

impl TunnelArena {
    pub fn new(max_tunnels: usize) -> Self {
        Self {
            tunnels: HashMap::new(),
            by_local_teid: HashMap::new(),
            teids: TeidPool::new(),
            next_id: 0,
            max_tunnels,
        }
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Create a fresh control tunnel with ref_count 1. `None` when the
    /// arena is at capacity; the caller turns that into a session-fatal
    /// allocation failure.
    pub fn create(
        &mut self,
        session: SessionId,
        local_ep: SocketAddr,
        peer_ep: SocketAddr,
    ) -> Option<TunId> {
        if self.tunnels.len() >= self.max_tunnels {
            return None;
        }
        let id = TunId(self.next_id);
        self.next_id += 1;
        let local_teid = self.teids.allocate();
        self.tunnels.insert(
            id,
            GtpcTun { local_teid, remote_teid: 0, local_ep, peer_ep, ref_count: 1, session },
        );
        self.by_local_teid.insert(local_teid, id);
        Some(id)
    }

    /// Another PDN starts referencing an existing tunnel (S11/S4 sharing).
    pub fn share(&mut self, id: TunId) {
        if let Some(tun) = self.tunnels.get_mut(&id) {
            tun.ref_count += 1;
        }
    }

    /// Drop one reference; the tunnel is freed and unindexed when the
    /// count reaches zero. Returns true when it was freed.
    pub fn release(&mut self, id: TunId) -> bool {
        let Some(tun) = self.tunnels.get_mut(&id) else {
            return false;
        };
        tun.ref_count -= 1;
        if tun.ref_count == 0 {
            let local_teid = tun.local_teid;
            self.tunnels.remove(&id);
            self.by_local_teid.remove(&local_teid);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: TunId) -> Option<&GtpcTun> {
        self.tunnels.get(&id)
    }

    pub fn get_mut(&mut self, id: TunId) -> Option<&mut GtpcTun> {
        self.tunnels.get_mut(&id)
    }

    /// TEID index: local control TEID -> tunnel.
    pub fn find_by_local_teid(&self, teid: u32) -> Option<TunId> {
        self.by_local_teid.get(&teid).copied()
    }

    /// Allocate a user-plane TEID for a bearer.
    pub fn allocate_uplane_teid(&mut self) -> u32 {
        self.teids.allocate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn arena() -> TunnelArena {
        TunnelArena::new(1024)
    }

    // --- creation / lookup ---

    #[test]
    fn create_indexes_by_local_teid() {
        let mut arena = arena();
        let id = arena.create(SessionId(1), ep(2123), ep(2124)).unwrap();
        let teid = arena.get(id).unwrap().local_teid;

        assert_eq!(arena.find_by_local_teid(teid), Some(id));
        assert_eq!(arena.get(id).unwrap().session, SessionId(1));
        assert_eq!(arena.get(id).unwrap().ref_count, 1);
    }

    #[test]
    fn local_teids_are_distinct() {
        let mut arena = arena();
        let a = arena.create(SessionId(1), ep(1), ep(2)).unwrap();
        let b = arena.create(SessionId(2), ep(1), ep(2)).unwrap();
        assert_ne!(
            arena.get(a).unwrap().local_teid,
            arena.get(b).unwrap().local_teid
        );
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let mut arena = TunnelArena::new(2);
        assert!(arena.create(SessionId(1), ep(1), ep(2)).is_some());
        assert!(arena.create(SessionId(2), ep(1), ep(2)).is_some());
        assert!(arena.create(SessionId(3), ep(1), ep(2)).is_none());
    }

    // --- reference counting ---

    #[test]
    fn share_and_release_track_refcount() {
        let mut arena = arena();
        let id = arena.create(SessionId(1), ep(1), ep(2)).unwrap();
        arena.share(id);
        assert_eq!(arena.get(id).unwrap().ref_count, 2);

        assert!(!arena.release(id));
        assert_eq!(arena.get(id).unwrap().ref_count, 1);

        assert!(arena.release(id));
        assert!(arena.get(id).is_none());
    }

    #[test]
    fn release_unindexes_teid() {
        let mut arena = arena();
        let id = arena.create(SessionId(1), ep(1), ep(2)).unwrap();
        let teid = arena.get(id).unwrap().local_teid;

        arena.release(id);
        assert_eq!(arena.find_by_local_teid(teid), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn release_unknown_tunnel_is_noop() {
        let mut arena = arena();
        let id = arena.create(SessionId(1), ep(1), ep(2)).unwrap();
        arena.release(id);
        assert!(!arena.release(id));
    }

    // --- bearers / PDN ---

    #[test]
    fn bearer_index_covers_ebi_range() {
        assert_eq!(bearer_index(5), Some(0));
        assert_eq!(bearer_index(15), Some(10));
        assert_eq!(bearer_index(4), None);
        assert_eq!(bearer_index(16), None);
    }

    #[test]
    fn pdn_bearer_mask() {
        let mut arena = arena();
        let tun = arena.create(SessionId(1), ep(1), ep(2)).unwrap();
        let mut pdn = GtpcPdn::new(tun);

        assert!(!pdn.has_bearer(5));
        pdn.mark_bearer(5);
        pdn.mark_bearer(15);
        assert!(pdn.has_bearer(5));
        assert!(pdn.has_bearer(15));
        assert!(!pdn.has_bearer(6));
    }
}
