// Load generation.
//
// A scheduler task that decides, each tick, how many outbound-initiated
// sessions are owed so the cumulative count tracks `rate * active time`.
// The keyboard can pause/resume generation and adjust the rate at runtime;
// paused time does not accrue owed sessions.

use tracing::info;

/// Smallest and largest adjustable rate, sessions per second.
const RATE_MIN: f64 = 1.0;
const RATE_MAX: f64 = 100_000.0;

/// How often the generator wakes to top up, in milliseconds.
const TICK_MS: u64 = 20;

#[derive(Debug)]
pub struct TrafficTask {
    rate: f64,
    target_total: u64,
    created: u64,
    paused: bool,
    active_ms: u64,
    last_run_ms: Option<u64>,
}

impl TrafficTask {
    pub fn new(rate: f64, target_total: u64) -> Self {
        Self { rate, target_total, created: 0, paused: false, active_ms: 0, last_run_ms: None }
    }

    /// Advance the generator to `now_ms`. Returns how many sessions to
    /// create right now and the next wake time (None when finished).
    pub fn step(&mut self, now_ms: u64) -> (u64, Option<u64>) {
        if let Some(last) = self.last_run_ms {
            if !self.paused {
                self.active_ms += now_ms.saturating_sub(last);
            }
        }
        self.last_run_ms = Some(now_ms);

        if self.done() {
            return (0, None);
        }
        if self.paused {
            return (0, Some(now_ms + TICK_MS));
        }

        let owed = ((self.rate * self.active_ms as f64 / 1000.0) as u64).min(self.target_total);
        let to_create = owed.saturating_sub(self.created);
        self.created += to_create;

        let next = if self.done() { None } else { Some(now_ms + TICK_MS) };
        (to_create, next)
    }

    pub fn done(&self) -> bool {
        self.created >= self.target_total
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        if !self.paused {
            info!("traffic paused");
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            info!("traffic resumed");
            self.paused = false;
        }
    }

    pub fn rate_up(&mut self) {
        self.set_rate(self.rate + 10.0);
    }

    pub fn rate_down(&mut self) {
        self.set_rate(self.rate - 10.0);
    }

    pub fn rate_double(&mut self) {
        self.set_rate(self.rate * 2.0);
    }

    pub fn rate_halve(&mut self) {
        self.set_rate(self.rate / 2.0);
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate.clamp(RATE_MIN, RATE_MAX);
        info!(rate = self.rate, "traffic rate adjusted");
    }
}
