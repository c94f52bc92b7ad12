// Engine: the cooperative run loop and the datagram dispatcher.
//
// One thread does everything, in a fixed per-pass order: sample the clock,
// move due tasks off the wheel, poll the transport for at most the time
// until the next wake, route whatever arrived, then drain the runnable
// queue. Session tasks are taken out of the registry while they run so
// the rest of the engine state can be borrowed field-wise alongside them.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::config::Config;
use crate::display::keyboard::{Keyboard, KeyCommand};
use crate::display::Display;
use crate::error::GtpLoadTestError;
use crate::gtp::header::GtpHeader;
use crate::gtp::peer::PeerTracker;
use crate::gtp::{GtpMsg, GtpMsgType, ImsiKey};
use crate::scenario::Scenario;
use crate::sched::{Clock, Scheduler, TaskRef};
use crate::session::{
    RunOutcome, SessionCtx, SessionId, SessionParams, SessionRegistry, TunnelArena, UeSession,
};
use crate::stats::StatsCollector;
use crate::traffic::TrafficTask;
use crate::transport::{Datagram, Transport};

/// Upper bound on one transport poll so the keyboard and signal flag stay
/// responsive even with an empty wheel.
const MAX_POLL_WAIT_MS: u64 = 100;

static QUIT_FLAG: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: i32) {
    QUIT_FLAG.store(true, Ordering::SeqCst);
}

/// Install a SIGINT handler that requests a clean engine shutdown (the
/// terminal raw mode must be unwound, not abandoned).
pub fn install_quit_handler() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
    }
}

pub fn quit_requested() -> bool {
    QUIT_FLAG.load(Ordering::SeqCst)
}

pub struct Engine<T: Transport> {
    scenario: Scenario,
    transport: T,
    sched: Scheduler,
    registry: SessionRegistry,
    tunnels: TunnelArena,
    peers: PeerTracker,
    stats: StatsCollector,
    clock: Clock,
    traffic: TrafficTask,
    display: Option<Display>,
    keyboard: Option<Keyboard>,
    params: SessionParams,
    local_ep: std::net::SocketAddr,
    remote_ep: std::net::SocketAddr,
    num_sessions: u64,
    next_imsi: u64,
    quit: bool,
}

impl<T: Transport> Engine<T> {
    pub fn new(config: &Config, scenario: Scenario, transport: T) -> Result<Self, GtpLoadTestError> {
        let params = SessionParams {
            t3_ms: config.t3_timer_ms,
            n3_max: config.n3_requests,
            dead_call_wait_ms: config.dead_call_wait_ms,
            node_type: config.node_type,
        };
        let display = (!config.headless).then(|| Display::new(config));

        Ok(Self {
            transport,
            sched: Scheduler::new(),
            registry: SessionRegistry::new(),
            tunnels: TunnelArena::new(config.max_tunnels),
            peers: PeerTracker::new(),
            stats: StatsCollector::new(),
            clock: Clock::new(),
            traffic: TrafficTask::new(config.session_rate, config.num_sessions),
            display,
            keyboard: None,
            params,
            local_ep: config.local_endpoint()?,
            remote_ep: config.remote_endpoint()?,
            num_sessions: config.num_sessions,
            next_imsi: config.imsi_base,
            quit: false,
            scenario,
        })
    }

    // --- accessors (display, tests) ---

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn tunnels(&self) -> &TunnelArena {
        &self.tunnels
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn traffic(&self) -> &TrafficTask {
        &self.traffic
    }

    // --- lifecycle ---

    /// Seed the root tasks. Must run before the first pass.
    pub fn start(&mut self, now_ms: u64) {
        self.sched.schedule(TaskRef::Traffic, 0, now_ms);
        if self.display.is_some() {
            self.sched.schedule(TaskRef::Display, 0, now_ms);
        }
    }

    /// The interactive entry point: loops until quit or all generated
    /// sessions have drained.
    pub fn run(&mut self) -> Result<(), GtpLoadTestError> {
        install_quit_handler();
        self.keyboard = Keyboard::init().ok();

        self.start(self.clock.now_ms());
        while !self.quit {
            let now = self.clock.now_ms();
            self.sched.advance(now);

            let wait = self.poll_wait(now);
            let datagrams = self.transport.poll(wait)?;

            let now = self.clock.now_ms();
            for datagram in datagrams {
                self.dispatch(datagram, now);
            }

            self.poll_keyboard();
            if quit_requested() {
                self.quit = true;
            }

            self.drain_runnable(now);

            if self.finished() {
                debug!("all sessions drained, shutting down");
                break;
            }
        }
        self.keyboard = None; // restore the terminal
        Ok(())
    }

    /// One deterministic pass at a caller-chosen time: advance timers,
    /// take whatever the transport has ready (zero wait), dispatch, run.
    /// This is the loop body `run` drives, minus the blocking poll.
    pub fn step_at(&mut self, now_ms: u64) -> Result<(), GtpLoadTestError> {
        self.sched.advance(now_ms);
        let datagrams = self.transport.poll(0)?;
        for datagram in datagrams {
            self.dispatch(datagram, now_ms);
        }
        self.drain_runnable(now_ms);
        Ok(())
    }

    pub fn finished(&self) -> bool {
        self.num_sessions > 0 && self.traffic.done() && self.registry.is_empty()
    }

    fn poll_wait(&self, now_ms: u64) -> u64 {
        if self.sched.has_runnable() {
            return 0;
        }
        match self.sched.next_wake() {
            Some(wake) => wake.saturating_sub(now_ms).min(MAX_POLL_WAIT_MS),
            None => MAX_POLL_WAIT_MS,
        }
    }

    // --- dispatcher ---

    /// Route one datagram to its session: by local control TEID when the
    /// header carries one, otherwise by the IMSI IE. An initial request
    /// for an unknown IMSI creates the session (responder side).
    fn dispatch(&mut self, datagram: Datagram, now_ms: u64) {
        let hdr = match GtpHeader::peek(&datagram.payload) {
            Ok(hdr) => hdr,
            Err(e) => {
                trace!(error = %e, "dropping unparseable datagram");
                self.stats.record_unexpected();
                return;
            }
        };

        let session_id = match hdr.teid {
            Some(teid) if teid != 0 => self
                .tunnels
                .find_by_local_teid(teid)
                .and_then(|tun| self.tunnels.get(tun))
                .map(|tun| tun.session),
            _ => self.route_by_imsi(&datagram, &hdr),
        };

        match session_id {
            Some(id) if self.registry.contains(id) => {
                if let Some(session) = self.registry.get_mut(id) {
                    session.inputs.push_back(datagram);
                }
                self.sched.schedule(TaskRef::Session(id), 0, now_ms);
            }
            _ => {
                trace!(msg_type = hdr.msg_type, teid = ?hdr.teid, "no session for datagram");
                self.stats.record_unexpected();
            }
        }
    }

    fn route_by_imsi(&mut self, datagram: &Datagram, hdr: &GtpHeader) -> Option<SessionId> {
        let msg = GtpMsg::decode(&datagram.payload).ok()?;
        let imsi = msg.imsi()?;

        if let Some(id) = self.registry.find_by_imsi(&imsi) {
            return Some(id);
        }

        // unknown subscriber: only an initial request on an
        // inbound-initiated scenario may create a session
        let initial = GtpMsgType::try_from(hdr.msg_type).is_ok_and(|t| t.is_initial());
        if !initial || !self.scenario.is_inbound_initiated() {
            return None;
        }
        Some(self.create_session(imsi))
    }

    fn create_session(&mut self, imsi: ImsiKey) -> SessionId {
        let id = self.registry.allocate_id();
        let session = UeSession::new(id, imsi, &self.params, self.remote_ep, self.local_ep);
        self.registry.insert(session);
        self.stats.record_session_created();
        id
    }

    // --- task dispatch ---

    fn drain_runnable(&mut self, now_ms: u64) {
        while let Some(task) = self.sched.next_runnable() {
            match task {
                TaskRef::Session(id) => self.run_session(id, now_ms),
                TaskRef::Traffic => self.run_traffic(now_ms),
                TaskRef::Display => self.run_display(now_ms),
            }
            if self.quit {
                break;
            }
        }
    }

    fn run_session(&mut self, id: SessionId, now_ms: u64) {
        let Some(mut session) = self.registry.take(id) else {
            return;
        };

        let mut stop = None;
        let mut outcome = RunOutcome::Idle;
        loop {
            let arg = session.inputs.pop_front();
            let was_input = arg.is_some();

            let mut ctx = SessionCtx {
                scenario: &self.scenario,
                tunnels: &mut self.tunnels,
                peers: &mut self.peers,
                stats: &self.stats,
                transport: &mut self.transport,
                now_ms,
            };
            match session.run(&mut ctx, arg) {
                RunOutcome::Stop(reason) => {
                    stop = Some(reason);
                    break;
                }
                other => outcome = other,
            }
            if !was_input || session.inputs.is_empty() {
                break;
            }
        }

        match stop {
            Some(reason) => {
                debug!(session = id.0, ?reason, "session stopped");
                self.sched.abort(TaskRef::Session(id));
                self.registry.unregister_imsi(&session.imsi);
                session.release_resources(&mut self.tunnels);
            }
            None => {
                match outcome {
                    RunOutcome::Continue => self.sched.schedule(TaskRef::Session(id), 0, now_ms),
                    RunOutcome::PauseUntil(wake) => {
                        self.sched.schedule(TaskRef::Session(id), wake, now_ms)
                    }
                    RunOutcome::Idle | RunOutcome::Stop(_) => {}
                }
                self.registry.restore(session);
            }
        }
    }

    fn run_traffic(&mut self, now_ms: u64) {
        let (to_create, next_wake) = self.traffic.step(now_ms);
        for _ in 0..to_create {
            let imsi = ImsiKey::from_imsi(self.next_imsi);
            self.next_imsi += 1;
            let id = self.create_session(imsi);
            self.sched.schedule(TaskRef::Session(id), 0, now_ms);
        }
        if let Some(wake) = next_wake {
            self.sched.schedule(TaskRef::Traffic, wake, now_ms);
        }
    }

    fn run_display(&mut self, now_ms: u64) {
        if let Some(display) = &self.display {
            let next = display.run(
                now_ms,
                &self.stats,
                &self.scenario,
                self.traffic.rate(),
                self.traffic.is_paused(),
            );
            self.sched.schedule(TaskRef::Display, next, now_ms);
        }
    }

    fn poll_keyboard(&mut self) {
        let Some(keyboard) = self.keyboard.as_mut() else {
            return;
        };
        while let Some(cmd) = keyboard.poll_key() {
            match cmd {
                KeyCommand::PauseTraffic => self.traffic.pause(),
                KeyCommand::ResumeTraffic => self.traffic.resume(),
                KeyCommand::RateUp => self.traffic.rate_up(),
                KeyCommand::RateDown => self.traffic.rate_down(),
                KeyCommand::RateDouble => self.traffic.rate_double(),
                KeyCommand::RateHalve => self.traffic.rate_halve(),
                KeyCommand::Quit => self.quit = true,
            }
        }
    }
}
