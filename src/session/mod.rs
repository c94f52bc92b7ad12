// UE session task: the GTP-C procedure state machine.
//
// A session walks its scenario's job sequence. Send jobs emit a rewritten
// template and, for requests, arm the T3 retransmission timer; Recv jobs
// match inbound messages against the expected type and sequence number,
// retransmit stored responses on duplicates and count strays; Wait jobs
// just pause. After the scenario completes the session lingers for the
// dead-call wait to absorb late peer traffic, then is reaped.

pub mod registry;
pub mod tunnel;

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, trace, warn};

use crate::config::NodeType;
use crate::gtp::header::MsgCategory;
use crate::gtp::ie::FteidIe;
use crate::gtp::peer::{seq_after, PeerTracker};
use crate::gtp::{GtpMsg, GtpMsgType, ImsiKey};
use crate::scenario::{JobKind, Scenario};
use crate::stats::StatsCollector;
use crate::transport::{ConnId, Datagram, Transport};

pub use registry::{SessionId, SessionRegistry};
pub use tunnel::{bearer_index, GtpBearer, GtpcPdn, GtpcTun, TunId, TunnelArena, MAX_BEARERS};

const F_WAITING_FOR_RSP: u32 = 1 << 0;
const F_SCN_COMPLETE: u32 = 1 << 1;

/// A datagram we sent and kept for verbatim retransmission.
#[derive(Debug, Clone)]
pub struct StoredMsg {
    pub conn_id: ConnId,
    pub peer: SocketAddr,
    pub payload: bytes::Bytes,
}

/// Book-keeping for the procedure in flight (`cur`) and the one before it
/// (`prev`, used for duplicate detection and response retransmission).
#[derive(Debug, Clone, Default)]
pub struct ProcRecord {
    pub conn_id: ConnId,
    pub seq_number: u32,
    pub req_type: Option<GtpMsgType>,
    pub rsp_type: Option<GtpMsgType>,
    pub sent_msg: Option<StoredMsg>,
    /// Index of the job this procedure originated from.
    pub job_idx: Option<usize>,
}

/// Timing and retry knobs a session is born with.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub t3_ms: u64,
    pub n3_max: u32,
    pub dead_call_wait_ms: u64,
    pub node_type: NodeType,
}

/// Engine state a session needs while running. Borrowed field-wise so the
/// session itself can be taken out of the registry during the call.
pub struct SessionCtx<'a, T: Transport> {
    pub scenario: &'a Scenario,
    pub tunnels: &'a mut TunnelArena,
    pub peers: &'a mut PeerTracker,
    pub stats: &'a StatsCollector,
    pub transport: &'a mut T,
    pub now_ms: u64,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Dead-call wait elapsed after a completed scenario.
    Reaped,
    MaxRetryExceeded,
    SendFailure,
    EncodeFailure,
    AllocFailure,
}

/// What the scheduler should do with the task next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Run again on the next pass (wake time 0).
    Continue,
    /// Sleep until the given absolute time.
    PauseUntil(u64),
    /// Nothing to do until input arrives.
    Idle,
    Stop(StopReason),
}

#[derive(Debug)]
pub struct UeSession {
    pub id: SessionId,
    pub imsi: ImsiKey,
    pub node_type: NodeType,
    peer_ep_default: SocketAddr,
    local_ep: SocketAddr,
    pdns: Vec<GtpcPdn>,
    cur_pdn: Option<usize>,
    bearers: [Option<GtpBearer>; MAX_BEARERS],
    cur_idx: usize,
    cur_proc: ProcRecord,
    prev_proc: ProcRecord,
    t3_ms: u64,
    n3_max: u32,
    retry_count: u32,
    last_run_ms: u64,
    /// Pending timer deadline, if any. Restored after input-driven runs so
    /// a duplicate datagram never cancels a T3 or dead-call timer.
    wake_ms: Option<u64>,
    flags: u32,
    dead_call_wait_ms: u64,
    /// Datagrams routed here by the dispatcher, not yet consumed.
    pub inputs: VecDeque<Datagram>,
}

impl UeSession {
    pub fn new(
        id: SessionId,
        imsi: ImsiKey,
        params: &SessionParams,
        peer_ep_default: SocketAddr,
        local_ep: SocketAddr,
    ) -> Self {
        debug!(session = id.0, %imsi, "creating UE session");
        Self {
            id,
            imsi,
            node_type: params.node_type,
            peer_ep_default,
            local_ep,
            pdns: Vec::new(),
            cur_pdn: None,
            bearers: [None; MAX_BEARERS],
            cur_idx: 0,
            cur_proc: ProcRecord::default(),
            prev_proc: ProcRecord::default(),
            t3_ms: params.t3_ms,
            n3_max: params.n3_max,
            retry_count: 0,
            last_run_ms: 0,
            wake_ms: None,
            flags: 0,
            dead_call_wait_ms: params.dead_call_wait_ms,
            inputs: VecDeque::new(),
        }
    }

    // --- read-only views (used by the engine, display and tests) ---

    pub fn cur_idx(&self) -> usize {
        self.cur_idx
    }

    pub fn is_waiting_for_rsp(&self) -> bool {
        self.flags & F_WAITING_FOR_RSP != 0
    }

    pub fn is_complete(&self) -> bool {
        self.flags & F_SCN_COMPLETE != 0
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn pdns(&self) -> &[GtpcPdn] {
        &self.pdns
    }

    pub fn bearer(&self, ebi: u8) -> Option<&GtpBearer> {
        bearer_index(ebi).and_then(|i| self.bearers[i].as_ref())
    }

    pub fn cur_proc(&self) -> &ProcRecord {
        &self.cur_proc
    }

    pub fn prev_proc(&self) -> &ProcRecord {
        &self.prev_proc
    }

    /// Release tunnel references when the session is destroyed. Must be
    /// called exactly once, by the engine, on removal.
    pub fn release_resources(&mut self, tunnels: &mut TunnelArena) {
        for pdn in self.pdns.drain(..) {
            tunnels.release(pdn.tun);
        }
        debug!(session = self.id.0, imsi = %self.imsi, "destroying UE session");
    }

    // --- entry point ---

    pub fn run<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        arg: Option<Datagram>,
    ) -> RunOutcome {
        trace!(session = self.id.0, "running UE session");
        self.last_run_ms = ctx.now_ms;

        if self.is_complete() {
            return self.handle_dead_call(ctx, arg);
        }
        match arg {
            Some(datagram) => self.handle_recv(ctx, datagram),
            None => self.step_jobs(ctx),
        }
    }

    /// Timer-driven job processing. Loops so that a triggered response (or
    /// any other immediately fireable job) executes in the same pass
    /// instead of recursing or bouncing off the scheduler.
    fn step_jobs<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>) -> RunOutcome {
        loop {
            let Some(job) = ctx.scenario.jobs.get(self.cur_idx) else {
                return self.idle();
            };
            match &job.kind {
                JobKind::Send { .. } => match self.handle_send(ctx) {
                    RunOutcome::Continue => continue,
                    other => return other,
                },
                JobKind::Wait { ms } => {
                    let wake = self.last_run_ms + *ms;
                    self.cur_idx += 1;
                    // a trailing wait folds into the dead-call linger
                    if self.scenario_done(ctx) {
                        return self.complete(ctx);
                    }
                    return self.pause_until(wake);
                }
                // nothing to do until the dispatcher feeds us
                JobKind::Recv { .. } => return self.idle(),
            }
        }
    }

    // --- send path ---

    fn handle_send<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>) -> RunOutcome {
        if self.is_waiting_for_rsp() {
            return self.handle_req_timeout(ctx);
        }

        let msg_type = match ctx.scenario.jobs[self.cur_idx].msg_type() {
            Some(t) => t,
            None => return self.fail(ctx, StopReason::EncodeFailure),
        };
        match msg_type.category() {
            MsgCategory::Request => self.send_request(ctx, msg_type),
            MsgCategory::Response => self.send_response(ctx, msg_type),
        }
    }

    fn send_request<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        msg_type: GtpMsgType,
    ) -> RunOutcome {
        // A Create Session Request opens a new PDN (reusing the control
        // tunnel on S11/S4); everything else rides the current one.
        if msg_type == GtpMsgType::CreateSessionRequest {
            match self.create_pdn(ctx) {
                Ok(idx) => self.cur_pdn = Some(idx),
                Err(reason) => return self.fail(ctx, reason),
            }
        }
        let Some(pdn_idx) = self.cur_pdn else {
            warn!(session = self.id.0, "request job with no PDN");
            return self.fail(ctx, StopReason::EncodeFailure);
        };
        if msg_type == GtpMsgType::CreateSessionRequest {
            self.create_bearers_from_job(ctx, pdn_idx);
        }

        let seq = ctx.peers.next_seq(self.peer_ep_default);
        self.cur_proc = ProcRecord {
            conn_id: 0,
            seq_number: seq,
            req_type: Some(msg_type),
            rsp_type: None,
            sent_msg: None,
            job_idx: Some(self.cur_idx),
        };

        let payload = match self.encode_out(ctx, pdn_idx, self.cur_idx, seq) {
            Ok(bytes) => bytes,
            Err(reason) => return self.fail(ctx, reason),
        };

        // initial messages always leave over the default socket
        if let Err(e) = ctx.transport.send(0, self.peer_ep_default, &payload) {
            warn!(session = self.id.0, error = %e, "request send failed");
            return self.fail(ctx, StopReason::SendFailure);
        }
        ctx.scenario.jobs[self.cur_idx].stats.inc_sent();

        self.cur_proc.sent_msg =
            Some(StoredMsg { conn_id: 0, peer: self.peer_ep_default, payload });
        self.flags |= F_WAITING_FOR_RSP;
        self.pause_until(self.last_run_ms + self.t3_ms)
    }

    /// T3 fired while a request was outstanding: retransmit or give up.
    fn handle_req_timeout<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>) -> RunOutcome {
        if self.retry_count >= self.n3_max {
            debug!(session = self.id.0, "maximum retries reached");
            ctx.scenario.jobs[self.cur_idx].stats.inc_timeouts();
            self.cur_proc.sent_msg = None;
            return self.fail(ctx, StopReason::MaxRetryExceeded);
        }

        let Some(stored) = self.cur_proc.sent_msg.clone() else {
            // waiting implies a stored request; losing it is fatal
            return self.fail(ctx, StopReason::SendFailure);
        };
        trace!(session = self.id.0, retry = self.retry_count + 1, "retransmitting request");
        if let Err(e) = ctx.transport.send(stored.conn_id, stored.peer, &stored.payload) {
            warn!(session = self.id.0, error = %e, "retransmission send failed");
            return self.fail(ctx, StopReason::SendFailure);
        }
        ctx.scenario.jobs[self.cur_idx].stats.inc_sent_retrans();
        self.retry_count += 1;
        self.pause_until(self.last_run_ms + self.t3_ms)
    }

    fn send_response<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        msg_type: GtpMsgType,
    ) -> RunOutcome {
        let Some(pdn_idx) = self.cur_pdn else {
            warn!(session = self.id.0, "response job with no PDN");
            return self.fail(ctx, StopReason::EncodeFailure);
        };

        let payload = match self.encode_out(ctx, pdn_idx, self.cur_idx, self.cur_proc.seq_number) {
            Ok(bytes) => bytes,
            Err(reason) => return self.fail(ctx, reason),
        };

        // triggered messages go back over the socket the request came in
        // on, to the endpoint it came from
        let conn_id = self.cur_proc.conn_id;
        let peer = ctx
            .tunnels
            .get(self.pdns[pdn_idx].tun)
            .map(|t| t.peer_ep)
            .unwrap_or(self.peer_ep_default);

        if let Err(e) = ctx.transport.send(conn_id, peer, &payload) {
            warn!(session = self.id.0, error = %e, "response send failed");
            return self.fail(ctx, StopReason::SendFailure);
        }
        ctx.scenario.jobs[self.cur_idx].stats.inc_sent();

        self.prev_proc.sent_msg = Some(StoredMsg { conn_id, peer, payload });
        self.prev_proc.rsp_type = Some(msg_type);

        self.cur_idx += 1;
        if self.scenario_done(ctx) {
            return self.complete(ctx);
        }
        self.cont()
    }

    // --- receive path ---

    fn handle_recv<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        datagram: Datagram,
    ) -> RunOutcome {
        let msg = match GtpMsg::decode(&datagram.payload) {
            Ok(msg) => msg,
            Err(e) => {
                trace!(session = self.id.0, error = %e, "undecodable datagram");
                self.count_unexpected(ctx, self.cur_idx);
                return self.resume();
            }
        };
        let Ok(msg_type) = msg.msg_type() else {
            self.count_unexpected(ctx, self.cur_idx);
            return self.resume();
        };

        match msg_type.category() {
            MsgCategory::Request => self.handle_inc_req(ctx, msg_type, &msg, &datagram),
            MsgCategory::Response => self.handle_inc_rsp(ctx, msg_type, &msg, &datagram),
        }
    }

    fn is_expected_req(&self, scenario: &Scenario, msg_type: GtpMsgType, seq: u32) -> bool {
        match scenario.jobs.get(self.cur_idx).map(|j| &j.kind) {
            Some(JobKind::Recv { expected }) => {
                *expected == msg_type && seq_after(seq, self.cur_proc.seq_number)
            }
            _ => false,
        }
    }

    fn is_prev_proc_req(&self, msg_type: GtpMsgType, seq: u32) -> bool {
        self.cur_idx > 0
            && self.prev_proc.req_type == Some(msg_type)
            && self.prev_proc.seq_number == seq
    }

    fn is_expected_rsp(&self, scenario: &Scenario, msg_type: GtpMsgType, seq: u32) -> bool {
        match scenario.jobs.get(self.cur_idx + 1).map(|j| &j.kind) {
            Some(JobKind::Recv { expected }) => {
                *expected == msg_type && self.cur_proc.seq_number == seq
            }
            _ => false,
        }
    }

    fn is_prev_proc_rsp(&self, msg_type: GtpMsgType, seq: u32) -> bool {
        self.cur_idx > 0
            && self.prev_proc.rsp_type == Some(msg_type)
            && self.prev_proc.seq_number == seq
    }

    fn handle_inc_req<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        msg_type: GtpMsgType,
        msg: &GtpMsg,
        datagram: &Datagram,
    ) -> RunOutcome {
        let seq = msg.seq();

        if self.is_expected_req(ctx.scenario, msg_type, seq) {
            ctx.scenario.jobs[self.cur_idx].stats.inc_recv();

            if msg_type == GtpMsgType::CreateSessionRequest && self.cur_pdn.is_none() {
                match self.create_pdn(ctx) {
                    Ok(idx) => self.cur_pdn = Some(idx),
                    Err(reason) => return self.fail(ctx, reason),
                }
            }

            self.cur_proc = ProcRecord {
                conn_id: datagram.conn_id,
                seq_number: seq,
                req_type: Some(msg_type),
                rsp_type: None,
                sent_msg: self.cur_proc.sent_msg.take(),
                job_idx: Some(self.cur_idx),
            };
            ctx.peers.note_rcvd(datagram.peer, seq);
            self.store_peer_info(ctx, msg_type, msg, datagram.peer);

            // prev_proc learns the request now; its sent_msg is filled in
            // when the triggered response goes out
            self.prev_proc.conn_id = datagram.conn_id;
            self.prev_proc.seq_number = seq;
            self.prev_proc.req_type = Some(msg_type);
            self.prev_proc.job_idx = Some(self.cur_idx);

            self.cur_idx += 1;
            if self.scenario_done(ctx) {
                return self.complete(ctx);
            }
            // fire the triggered response in this same pass
            return self.step_jobs(ctx);
        }

        if self.is_prev_proc_req(msg_type, seq) {
            self.count_prev_retrans(ctx);
            self.resend_prev_response(ctx);
            return self.resume();
        }

        self.count_unexpected(ctx, self.cur_idx);
        self.resume()
    }

    fn handle_inc_rsp<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        msg_type: GtpMsgType,
        msg: &GtpMsg,
        datagram: &Datagram,
    ) -> RunOutcome {
        let seq = msg.seq();

        if self.is_expected_rsp(ctx.scenario, msg_type, seq) {
            debug!(session = self.id.0, seq, "expected response received");

            self.prev_proc.conn_id = datagram.conn_id;
            self.prev_proc.seq_number = self.cur_proc.seq_number;
            self.prev_proc.req_type = self.cur_proc.req_type;
            self.prev_proc.rsp_type = Some(msg_type);
            self.prev_proc.job_idx = Some(self.cur_idx + 1);

            // past the Send job, onto the Recv job that matched
            self.cur_idx += 1;
            ctx.scenario.jobs[self.cur_idx].stats.inc_recv();
            self.store_peer_info(ctx, msg_type, msg, datagram.peer);

            self.flags &= !F_WAITING_FOR_RSP;
            self.cur_proc.sent_msg = None;

            // and past the Recv job itself
            self.cur_idx += 1;
            if self.scenario_done(ctx) {
                return self.complete(ctx);
            }
            return self.cont();
        }

        if self.is_prev_proc_rsp(msg_type, seq) {
            debug!(session = self.id.0, seq, "response for previous procedure");
            self.count_prev_retrans(ctx);
            return self.resume();
        }

        // strays are charged to the Recv job that is (or would be) pending
        let idx = match ctx.scenario.jobs.get(self.cur_idx + 1) {
            Some(job) if job.is_recv() => self.cur_idx + 1,
            _ => self.cur_idx,
        };
        self.count_unexpected(ctx, idx);
        self.resume()
    }

    // --- dead-call handling ---

    fn handle_dead_call<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        arg: Option<Datagram>,
    ) -> RunOutcome {
        let Some(datagram) = arg else {
            // timer wake: reap once the grace period has elapsed
            if self.wake_ms.is_some_and(|wake| self.last_run_ms >= wake) {
                return RunOutcome::Stop(StopReason::Reaped);
            }
            return self.resume();
        };

        ctx.stats.record_dead_call();
        let Ok(msg) = GtpMsg::decode(&datagram.payload) else {
            return self.resume();
        };
        let Ok(msg_type) = msg.msg_type() else {
            return self.resume();
        };

        match msg_type.category() {
            MsgCategory::Request if self.is_prev_proc_req(msg_type, msg.seq()) => {
                self.count_prev_retrans(ctx);
                self.resend_prev_response(ctx);
            }
            MsgCategory::Response if self.is_prev_proc_rsp(msg_type, msg.seq()) => {
                self.count_prev_retrans(ctx);
            }
            _ => {}
        }
        self.resume()
    }

    // --- helpers ---

    fn create_pdn<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
    ) -> Result<usize, StopReason> {
        let tun = if ctx.scenario.if_type.shares_ctun() && !self.pdns.is_empty() {
            // S11/S4: all PDNs of a UE ride one control tunnel
            let tun = self.pdns[0].tun;
            ctx.tunnels.share(tun);
            tun
        } else {
            ctx.tunnels
                .create(self.id, self.local_ep, self.peer_ep_default)
                .ok_or(StopReason::AllocFailure)?
        };
        self.pdns.push(GtpcPdn::new(tun));
        Ok(self.pdns.len() - 1)
    }

    /// Attach the bearers declared in the current Send template.
    fn create_bearers_from_job<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>, pdn_idx: usize) {
        if let JobKind::Send { template } = &ctx.scenario.jobs[self.cur_idx].kind {
            let ebis: Vec<u8> = template
                .bearer_contexts(0)
                .map(|v| v.iter().map(|bc| bc.ebi).collect())
                .unwrap_or_default();
            self.attach_bearers(ctx.tunnels, pdn_idx, &ebis);
        }
    }

    fn attach_bearers(&mut self, tunnels: &mut TunnelArena, pdn_idx: usize, ebis: &[u8]) {
        for &ebi in ebis {
            let Some(idx) = bearer_index(ebi) else { continue };
            if self.bearers[idx].is_none() {
                self.bearers[idx] =
                    Some(GtpBearer { ebi, uplane_local_teid: tunnels.allocate_uplane_teid() });
            }
            self.pdns[pdn_idx].mark_bearer(ebi);
        }
    }

    /// Learn what an inbound message teaches us: the peer's control TEID
    /// (from the sender F-TEID on session-creating messages), the concrete
    /// peer endpoint, and any bearers a Create Session Request declares.
    fn store_peer_info<T: Transport>(
        &mut self,
        ctx: &mut SessionCtx<'_, T>,
        msg_type: GtpMsgType,
        msg: &GtpMsg,
        peer: SocketAddr,
    ) {
        let Some(pdn_idx) = self.cur_pdn else { return };
        let tun_id = self.pdns[pdn_idx].tun;

        if matches!(
            msg_type,
            GtpMsgType::CreateSessionRequest | GtpMsgType::CreateSessionResponse
        ) {
            if let Ok(Some(fteid)) = msg.sender_fteid() {
                if let Some(tun) = ctx.tunnels.get_mut(tun_id) {
                    tun.remote_teid = fteid.teid;
                }
            }
        }
        if let Some(tun) = ctx.tunnels.get_mut(tun_id) {
            tun.peer_ep = peer;
        }

        if msg_type == GtpMsgType::CreateSessionRequest {
            let ebis: Vec<u8> = msg
                .bearer_contexts(0)
                .map(|v| v.iter().map(|bc| bc.ebi).collect())
                .unwrap_or_default();
            self.attach_bearers(ctx.tunnels, pdn_idx, &ebis);
        }
    }

    /// Clone the job's template and rewrite the dynamic fields: header
    /// TEID and sequence number, IMSI and sender F-TEID on session
    /// creation, and every bearer's user-plane F-TEID.
    fn encode_out<T: Transport>(
        &self,
        ctx: &SessionCtx<'_, T>,
        pdn_idx: usize,
        job_idx: usize,
        seq: u32,
    ) -> Result<bytes::Bytes, StopReason> {
        let JobKind::Send { template } = &ctx.scenario.jobs[job_idx].kind else {
            return Err(StopReason::EncodeFailure);
        };
        let mut msg = template.clone();
        let msg_type = msg.msg_type().map_err(|_| StopReason::EncodeFailure)?;

        let (local_teid, remote_teid) = {
            let tun = ctx
                .tunnels
                .get(self.pdns[pdn_idx].tun)
                .ok_or(StopReason::EncodeFailure)?;
            (tun.local_teid, tun.remote_teid)
        };

        // the peer has no TEID for us yet when we open the session
        let dst_teid =
            if msg_type == GtpMsgType::CreateSessionRequest { 0 } else { remote_teid };
        msg.set_header(dst_teid, seq);

        let local_ip = self.local_ep.ip();
        match msg_type {
            GtpMsgType::CreateSessionRequest => {
                msg.set_imsi(&self.imsi);
                msg.set_sender_fteid(&FteidIe::new(
                    ctx.scenario.if_type.ctrl_fteid_if(),
                    local_teid,
                    local_ip,
                ));
            }
            GtpMsgType::CreateSessionResponse => {
                msg.set_sender_fteid(&FteidIe::new(
                    ctx.scenario.if_type.ctrl_fteid_if(),
                    local_teid,
                    local_ip,
                ));
            }
            _ => {}
        }

        let bearers = &self.bearers;
        msg.rewrite_bearer_fteids(ctx.scenario.if_type.user_fteid_if(), local_ip, |ebi| {
            bearer_index(ebi).and_then(|i| bearers[i].map(|b| b.uplane_local_teid))
        })
        .map_err(|_| StopReason::EncodeFailure)?;

        Ok(msg.encode())
    }

    fn resend_prev_response<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>) {
        if let Some(stored) = &self.prev_proc.sent_msg {
            trace!(session = self.id.0, "retransmitting stored response");
            if let Err(e) = ctx.transport.send(stored.conn_id, stored.peer, &stored.payload) {
                warn!(session = self.id.0, error = %e, "response retransmission failed");
            }
        }
    }

    fn count_prev_retrans<T: Transport>(&self, ctx: &SessionCtx<'_, T>) {
        if let Some(idx) = self.prev_proc.job_idx {
            ctx.scenario.jobs[idx].stats.inc_recv_retrans();
        }
    }

    fn count_unexpected<T: Transport>(&self, ctx: &SessionCtx<'_, T>, job_idx: usize) {
        if let Some(job) = ctx.scenario.jobs.get(job_idx) {
            job.stats.inc_unexpected();
        }
    }

    fn scenario_done<T: Transport>(&self, ctx: &SessionCtx<'_, T>) -> bool {
        self.cur_idx >= ctx.scenario.jobs.len()
    }

    fn complete<T: Transport>(&mut self, ctx: &mut SessionCtx<'_, T>) -> RunOutcome {
        debug!(session = self.id.0, imsi = %self.imsi, "scenario complete");
        self.flags |= F_SCN_COMPLETE;
        ctx.stats.record_session_succ();
        self.pause_until(self.last_run_ms + self.dead_call_wait_ms)
    }

    fn fail<T: Transport>(&mut self, ctx: &SessionCtx<'_, T>, reason: StopReason) -> RunOutcome {
        ctx.stats.record_session_fail();
        RunOutcome::Stop(reason)
    }

    fn pause_until(&mut self, wake_ms: u64) -> RunOutcome {
        self.wake_ms = Some(wake_ms);
        RunOutcome::PauseUntil(wake_ms)
    }

    fn cont(&mut self) -> RunOutcome {
        self.wake_ms = None;
        RunOutcome::Continue
    }

    fn idle(&mut self) -> RunOutcome {
        self.wake_ms = None;
        RunOutcome::Idle
    }

    /// Outcome after consuming input that did not change the job position:
    /// restore whatever timer was pending.
    fn resume(&self) -> RunOutcome {
        match self.wake_ms {
            Some(wake) if wake > self.last_run_ms => RunOutcome::PauseUntil(wake),
            Some(_) => RunOutcome::Continue,
            None => RunOutcome::Idle,
        }
    }
}
