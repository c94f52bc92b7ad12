// Session-level statistics.
//
// Monotonic counters (plus the in-flight gauge) shared between the engine
// and the display. Per-job message counters live on the scenario jobs, not
// here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct StatsCollector {
    sessions_created: AtomicU64,
    sessions: AtomicU64,
    sessions_succ: AtomicU64,
    sessions_fail: AtomicU64,
    dead_calls: AtomicU64,
    unexpected: AtomicU64,
    start_time: Instant,
}

/// A point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions_created: u64,
    pub sessions: u64,
    pub sessions_succ: u64,
    pub sessions_fail: u64,
    pub dead_calls: u64,
    pub unexpected: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            sessions_succ: AtomicU64::new(0),
            sessions_fail: AtomicU64::new(0),
            dead_calls: AtomicU64::new(0),
            unexpected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// A new session came into existence (either direction).
    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A session ran its scenario to completion.
    pub fn record_session_succ(&self) {
        self.sessions_succ.fetch_add(1, Ordering::Relaxed);
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// A session died on retry exhaustion or a fatal send/encode error.
    pub fn record_session_fail(&self) {
        self.sessions_fail.fetch_add(1, Ordering::Relaxed);
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// A straggler datagram reached a completed session.
    pub fn record_dead_call(&self) {
        self.dead_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// The dispatcher dropped a datagram it could not route.
    pub fn record_unexpected(&self) {
        self.unexpected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_time_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            sessions_succ: self.sessions_succ.load(Ordering::Relaxed),
            sessions_fail: self.sessions_fail.load(Ordering::Relaxed),
            dead_calls: self.dead_calls.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
