// Scenario model and loader.
//
// A scenario file is an ordered list of steps (send / recv / wait). The
// loader compiles it once into an immutable `Scenario`: message templates
// are fully built here so a session only rewrites dynamic fields at send
// time. Job counters are atomics because every live session shares the
// same job objects and the display reads them concurrently.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::GtpLoadTestError;
use crate::gtp::ie::{BearerContextIe, GtpIe};
use crate::gtp::{GtpMsg, GtpMsgType, MsgCategory};

/// GTP-C reference point the scenario runs on. S11 and S4 share one
/// control tunnel across all PDNs of a UE; the others get a tunnel per
/// PDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfType {
    S11Mme,
    S11S4Sgw,
    S5S8Sgw,
    S5S8Pgw,
}

impl IfType {
    pub fn shares_ctun(self) -> bool {
        matches!(self, IfType::S11Mme | IfType::S11S4Sgw)
    }

    /// F-TEID interface type stamped into sender (control) F-TEIDs.
    pub fn ctrl_fteid_if(self) -> u8 {
        use crate::gtp::ie::*;
        match self {
            IfType::S11Mme => FTEID_IF_S11_MME_GTPC,
            IfType::S11S4Sgw => FTEID_IF_S11S4_SGW_GTPC,
            IfType::S5S8Sgw => FTEID_IF_S5S8_SGW_GTPC,
            IfType::S5S8Pgw => FTEID_IF_S5S8_PGW_GTPC,
        }
    }

    /// F-TEID interface type stamped into bearer (user-plane) F-TEIDs.
    pub fn user_fteid_if(self) -> u8 {
        use crate::gtp::ie::*;
        match self {
            IfType::S11Mme => FTEID_IF_S1U_ENODEB,
            IfType::S11S4Sgw => FTEID_IF_S1U_SGW,
            IfType::S5S8Sgw => FTEID_IF_S5S8_SGW_GTPU,
            IfType::S5S8Pgw => FTEID_IF_S5S8_PGW_GTPU,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IfType::S11Mme => "S11-MME",
            IfType::S11S4Sgw => "S11/S4-SGW",
            IfType::S5S8Sgw => "S5/S8-SGW",
            IfType::S5S8Pgw => "S5/S8-PGW",
        }
    }
}

/// Per-job counters, updated by sessions, read by the display.
#[derive(Debug, Default)]
pub struct JobStats {
    pub sent: AtomicU64,
    pub sent_retrans: AtomicU64,
    pub recv: AtomicU64,
    pub recv_retrans: AtomicU64,
    pub timeouts: AtomicU64,
    pub unexpected: AtomicU64,
}

impl JobStats {
    pub fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_sent_retrans(&self) {
        self.sent_retrans.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_recv(&self) {
        self.recv.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_recv_retrans(&self) {
        self.recv_retrans.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_unexpected(&self) {
        self.unexpected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
    pub fn get_sent_retrans(&self) -> u64 {
        self.sent_retrans.load(Ordering::Relaxed)
    }
    pub fn get_recv(&self) -> u64 {
        self.recv.load(Ordering::Relaxed)
    }
    pub fn get_recv_retrans(&self) -> u64 {
        self.recv_retrans.load(Ordering::Relaxed)
    }
    pub fn get_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
    pub fn get_unexpected(&self) -> u64 {
        self.unexpected.load(Ordering::Relaxed)
    }
}

/// What one scenario step does.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Emit the (rewritten) template.
    Send { template: GtpMsg },
    /// Wait for a message of this type.
    Recv { expected: GtpMsgType },
    /// Pause the session.
    Wait { ms: u64 },
}

#[derive(Debug)]
pub struct Job {
    pub kind: JobKind,
    pub msg_name: String,
    pub stats: JobStats,
}

impl Job {
    pub fn msg_type(&self) -> Option<GtpMsgType> {
        match &self.kind {
            JobKind::Send { template } => template.msg_type().ok(),
            JobKind::Recv { expected } => Some(*expected),
            JobKind::Wait { .. } => None,
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self.kind, JobKind::Send { .. })
    }

    pub fn is_recv(&self) -> bool {
        matches!(self.kind, JobKind::Recv { .. })
    }
}

/// Display-level grouping of jobs into protocol transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Procedure {
    Wait { job: usize },
    ReqRsp { initial: usize, triggered: usize },
    ReqTrigRep { initial: usize, triggered: usize, reply: usize },
    /// A job that did not pair up (kept so the display shows everything).
    Single { job: usize },
}

/// Immutable after load; shared read-only by every session.
#[derive(Debug)]
pub struct Scenario {
    pub name: String,
    pub if_type: IfType,
    pub jobs: Vec<Job>,
    pub procedures: Vec<Procedure>,
}

impl Scenario {
    /// True when the first job receives: sessions are then created by the
    /// dispatcher on the first inbound request, not by the load generator.
    pub fn is_inbound_initiated(&self) -> bool {
        self.jobs.first().is_some_and(|j| j.is_recv())
    }
}

// --- scenario file ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIeDef {
    #[serde(rename = "type")]
    pub ie_type: u8,
    #[serde(default)]
    pub instance: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepDef {
    Send {
        msg: String,
        #[serde(default)]
        bearers: Vec<u8>,
        #[serde(default)]
        ies: Vec<RawIeDef>,
    },
    Recv {
        msg: String,
    },
    Wait {
        ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub name: String,
    pub interface: IfType,
    pub steps: Vec<StepDef>,
}

pub fn load_from_str(json: &str) -> Result<Scenario, GtpLoadTestError> {
    let file: ScenarioFile = serde_json::from_str(json)
        .map_err(|e| GtpLoadTestError::ScenarioError(format!("parse failure: {e}")))?;
    compile(file)
}

pub fn load_from_file(path: &Path) -> Result<Scenario, GtpLoadTestError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GtpLoadTestError::ScenarioError(format!("cannot read {}: {e}", path.display()))
    })?;
    load_from_str(&content)
}

/// Compile a parsed file into the runtime scenario.
pub fn compile(file: ScenarioFile) -> Result<Scenario, GtpLoadTestError> {
    if file.steps.is_empty() {
        return Err(GtpLoadTestError::ScenarioError("scenario has no steps".into()));
    }

    let mut jobs = Vec::with_capacity(file.steps.len());
    for (i, step) in file.steps.into_iter().enumerate() {
        let job = match step {
            StepDef::Send { msg, bearers, ies } => {
                let msg_type = parse_msg(&msg, i)?;
                let mut template = GtpMsg::new(msg_type);
                for ebi in bearers {
                    if !(5..=15).contains(&ebi) {
                        return Err(GtpLoadTestError::ScenarioError(format!(
                            "step {i}: EBI {ebi} out of range 5..=15"
                        )));
                    }
                    template.add_ie(BearerContextIe::new(ebi, None).to_ie(0));
                }
                for ie in ies {
                    template.add_ie(GtpIe::new(ie.ie_type, ie.instance, ie.value.into()));
                }
                Job { kind: JobKind::Send { template }, msg_name: msg, stats: JobStats::default() }
            }
            StepDef::Recv { msg } => {
                let expected = parse_msg(&msg, i)?;
                Job { kind: JobKind::Recv { expected }, msg_name: msg, stats: JobStats::default() }
            }
            StepDef::Wait { ms } => Job {
                kind: JobKind::Wait { ms },
                msg_name: format!("wait_{ms}ms"),
                stats: JobStats::default(),
            },
        };
        jobs.push(job);
    }

    let procedures = group_procedures(&jobs);
    Ok(Scenario { name: file.name, if_type: file.interface, jobs, procedures })
}

fn parse_msg(name: &str, step: usize) -> Result<GtpMsgType, GtpLoadTestError> {
    GtpMsgType::from_str(name)
        .map_err(|e| GtpLoadTestError::ScenarioError(format!("step {step}: {e}")))
}

/// Group jobs into display procedures: a request followed by its triggered
/// response is one transaction; a command that triggers a request which in
/// turn gets a reply spans three jobs.
fn group_procedures(jobs: &[Job]) -> Vec<Procedure> {
    let mut procedures = Vec::new();
    let cat = |idx: usize| jobs.get(idx).and_then(|j| j.msg_type()).map(|t| t.category());

    let mut i = 0;
    while i < jobs.len() {
        if matches!(jobs[i].kind, JobKind::Wait { .. }) {
            procedures.push(Procedure::Wait { job: i });
            i += 1;
        } else if cat(i) == Some(MsgCategory::Request)
            && cat(i + 1) == Some(MsgCategory::Request)
            && cat(i + 2) == Some(MsgCategory::Response)
        {
            procedures.push(Procedure::ReqTrigRep { initial: i, triggered: i + 1, reply: i + 2 });
            i += 3;
        } else if cat(i) == Some(MsgCategory::Request) && cat(i + 1) == Some(MsgCategory::Response)
        {
            procedures.push(Procedure::ReqRsp { initial: i, triggered: i + 1 });
            i += 2;
        } else {
            procedures.push(Procedure::Single { job: i });
            i += 1;
        }
    }
    procedures
}

/// A ready-to-edit example scenario (what `example-config` prints).
pub fn example_scenario_file() -> ScenarioFile {
    ScenarioFile {
        name: "s11-attach-detach".to_string(),
        interface: IfType::S11Mme,
        steps: vec![
            StepDef::Send {
                msg: "create_session_req".to_string(),
                bearers: vec![5],
                ies: Vec::new(),
            },
            StepDef::Recv { msg: "create_session_rsp".to_string() },
            StepDef::Send {
                msg: "modify_bearer_req".to_string(),
                bearers: vec![5],
                ies: Vec::new(),
            },
            StepDef::Recv { msg: "modify_bearer_rsp".to_string() },
            StepDef::Wait { ms: 1000 },
            StepDef::Send { msg: "delete_session_req".to_string(), bearers: Vec::new(), ies: Vec::new() },
            StepDef::Recv { msg: "delete_session_rsp".to_string() },
        ],
    }
}
