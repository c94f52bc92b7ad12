// Per-peer sequence number state.
//
// Outbound sequence numbers are allocated per remote endpoint and wrap
// modulo 2^24. Inbound, the last sequence seen from each peer is recorded;
// "newer" is judged within a modular half-window so the expected-request
// check keeps working across the wrap.

use std::collections::HashMap;
use std::net::SocketAddr;

use super::header::GTPC_SEQ_MASK;

const SEQ_HALF_WINDOW: u32 = 0x0080_0000;

/// True when `a` is strictly later than `b` in 24-bit modular order.
pub fn seq_after(a: u32, b: u32) -> bool {
    let a = a & GTPC_SEQ_MASK;
    let b = b & GTPC_SEQ_MASK;
    a != b && a.wrapping_sub(b) & GTPC_SEQ_MASK < SEQ_HALF_WINDOW
}

#[derive(Debug, Default)]
struct PeerEntry {
    next_seq: u32,
    last_rcvd: Option<u32>,
}

/// Tracks sequence state for every remote endpoint the simulator talks to.
#[derive(Debug, Default)]
pub struct PeerTracker {
    peers: HashMap<SocketAddr, PeerEntry>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outbound sequence number for `peer`. The first
    /// allocation returns 1; 24-bit wrap-around thereafter.
    pub fn next_seq(&mut self, peer: SocketAddr) -> u32 {
        let entry = self.peers.entry(peer).or_default();
        entry.next_seq = entry.next_seq.wrapping_add(1) & GTPC_SEQ_MASK;
        entry.next_seq
    }

    /// Record the sequence number of a message received from `peer`.
    pub fn note_rcvd(&mut self, peer: SocketAddr, seq: u32) {
        self.peers.entry(peer).or_default().last_rcvd = Some(seq & GTPC_SEQ_MASK);
    }

    pub fn last_rcvd(&self, peer: SocketAddr) -> Option<u32> {
        self.peers.get(&peer).and_then(|e| e.last_rcvd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        format!("192.0.2.1:{port}").parse().unwrap()
    }

    // --- outbound allocation ---

    #[test]
    fn first_seq_is_one_and_monotone() {
        let mut tracker = PeerTracker::new();
        assert_eq!(tracker.next_seq(peer(2123)), 1);
        assert_eq!(tracker.next_seq(peer(2123)), 2);
        assert_eq!(tracker.next_seq(peer(2123)), 3);
    }

    #[test]
    fn peers_have_independent_sequences() {
        let mut tracker = PeerTracker::new();
        assert_eq!(tracker.next_seq(peer(2123)), 1);
        assert_eq!(tracker.next_seq(peer(2124)), 1);
        assert_eq!(tracker.next_seq(peer(2123)), 2);
    }

    #[test]
    fn seq_wraps_at_24_bits() {
        let mut tracker = PeerTracker::new();
        let p = peer(2123);
        tracker.peers.entry(p).or_default().next_seq = GTPC_SEQ_MASK - 1;
        assert_eq!(tracker.next_seq(p), GTPC_SEQ_MASK);
        assert_eq!(tracker.next_seq(p), 0);
        assert_eq!(tracker.next_seq(p), 1);
    }

    // --- inbound tracking ---

    #[test]
    fn last_rcvd_tracks_per_peer() {
        let mut tracker = PeerTracker::new();
        assert_eq!(tracker.last_rcvd(peer(2123)), None);
        tracker.note_rcvd(peer(2123), 10);
        tracker.note_rcvd(peer(2124), 20);
        assert_eq!(tracker.last_rcvd(peer(2123)), Some(10));
        assert_eq!(tracker.last_rcvd(peer(2124)), Some(20));
    }

    // --- modular ordering ---

    #[test]
    fn seq_after_basic() {
        assert!(seq_after(2, 1));
        assert!(!seq_after(1, 2));
        assert!(!seq_after(5, 5));
    }

    #[test]
    fn seq_after_across_wrap() {
        assert!(seq_after(0, GTPC_SEQ_MASK));
        assert!(seq_after(5, GTPC_SEQ_MASK - 5));
        assert!(!seq_after(GTPC_SEQ_MASK, 0));
    }

    #[test]
    fn seq_after_half_window_boundary() {
        // exactly half a window ahead is not "after"
        assert!(!seq_after(0x0080_0000, 0));
        assert!(seq_after(0x007F_FFFF, 0));
    }

    use proptest::prelude::*;

    proptest! {
        /// Antisymmetry: for distinct sequence numbers exactly one
        /// direction is "after", except at the half-window point.
        #[test]
        fn prop_seq_after_antisymmetric(a in 0u32..0x100_0000, b in 0u32..0x100_0000) {
            let diff = a.wrapping_sub(b) & GTPC_SEQ_MASK;
            if a == b {
                prop_assert!(!seq_after(a, b) && !seq_after(b, a));
            } else if diff != SEQ_HALF_WINDOW {
                prop_assert_ne!(seq_after(a, b), seq_after(b, a));
            }
        }

        /// Every allocation is "after" the previous one.
        #[test]
        fn prop_allocations_are_monotone(start in 0u32..0x100_0000, steps in 1usize..200) {
            let mut tracker = PeerTracker::new();
            let p: SocketAddr = "198.51.100.7:2123".parse().unwrap();
            tracker.peers.entry(p).or_default().next_seq = start;

            let mut prev = tracker.next_seq(p);
            for _ in 0..steps {
                let next = tracker.next_seq(p);
                prop_assert!(seq_after(next, prev), "{} not after {}", next, prev);
                prev = next;
            }
        }
    }
}
