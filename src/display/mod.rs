// Periodic statistics screen.
//
// Runs as a scheduler task: every refresh interval it repaints the whole
// screen with the session counters and the per-job table, grouped by
// procedure the way the scenario defined them.

pub mod keyboard;

use std::io::Write;

use crate::config::{Config, NodeType};
use crate::scenario::{Job, JobKind, Procedure, Scenario};
use crate::stats::StatsCollector;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const SEPARATOR: &str =
    "+------------------------+----------------------------+-----------------------+";

#[derive(Debug)]
pub struct Display {
    refresh_ms: u64,
    node_type: NodeType,
    local_host: String,
    remote_host: String,
}

impl Display {
    pub fn new(config: &Config) -> Self {
        Self {
            refresh_ms: config.display_refresh_ms,
            node_type: config.node_type,
            local_host: format!("{}:{}", config.local_ip, config.local_gtpc_port),
            remote_host: format!("{}:{}", config.remote_ip, config.remote_gtpc_port),
        }
    }

    pub fn refresh_ms(&self) -> u64 {
        self.refresh_ms
    }

    /// Repaint to stdout; returns the next wake time.
    pub fn run(
        &self,
        now_ms: u64,
        stats: &StatsCollector,
        scenario: &Scenario,
        rate: f64,
        paused: bool,
    ) -> u64 {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(CLEAR_SCREEN.as_bytes());
        let _ = out.write_all(self.render(stats, scenario, rate, paused).as_bytes());
        let _ = out.flush();
        now_ms + self.refresh_ms
    }

    /// Build the whole screen as a string (separated out for tests).
    pub fn render(
        &self,
        stats: &StatsCollector,
        scenario: &Scenario,
        rate: f64,
        paused: bool,
    ) -> String {
        let snap = stats.snapshot();
        let mut s = String::with_capacity(2048);

        s.push_str(SEPARATOR);
        s.push_str("\r\n");
        s.push_str(&format!(
            "Run-Time: {}s   Rate: {:.0}/s   Node: {}   Scenario: {}\r\n",
            stats.run_time_secs(),
            rate,
            self.node_type.as_str(),
            scenario.name,
        ));
        s.push_str(&format!(
            "Local-Host: {}   Remote-Host: {}   Interface: {}\r\n",
            self.local_host,
            self.remote_host,
            scenario.if_type.as_str(),
        ));
        s.push_str(SEPARATOR);
        s.push_str("\r\n");

        s.push_str(&format!("Total-Sessions:    {}\r\n", snap.sessions_created));
        s.push_str(&format!("Session-Active:    {}\r\n", snap.sessions));
        s.push_str(&format!("Session-Completed: {}\r\n", snap.sessions_succ));
        s.push_str(&format!("Session-Aborted:   {}\r\n", snap.sessions_fail));
        s.push_str(&format!("Dead-Calls:        {}\r\n", snap.dead_calls));
        s.push_str(&format!("Unexpected:        {}\r\n", snap.unexpected));
        s.push_str(SEPARATOR);
        s.push_str("\r\n");

        s.push_str(
            "                                 Messages  Retrans   Timeout   Unexpected-Msg\r\n",
        );
        for proc in &scenario.procedures {
            match proc {
                Procedure::Wait { job } => render_job(&mut s, &scenario.jobs[*job]),
                Procedure::ReqRsp { initial, triggered } => {
                    render_job(&mut s, &scenario.jobs[*initial]);
                    render_job(&mut s, &scenario.jobs[*triggered]);
                }
                Procedure::ReqTrigRep { initial, triggered, reply } => {
                    render_job(&mut s, &scenario.jobs[*initial]);
                    render_job(&mut s, &scenario.jobs[*triggered]);
                    render_job(&mut s, &scenario.jobs[*reply]);
                }
                Procedure::Single { job } => render_job(&mut s, &scenario.jobs[*job]),
            }
        }

        s.push_str("\r\n");
        if paused {
            s.push_str(
                "+---Adjust-Rate [+/-]----+----Resume-Traffic [c]------+-------Quit [q]--------+\r\n",
            );
        } else {
            s.push_str(
                "+--Adjust-Rate [+|-|*|/]--+-----Pause-Traffic [p]-----+-------Quit [q]--------+\r\n",
            );
        }
        s
    }
}

fn render_job(s: &mut String, job: &Job) {
    match &job.kind {
        JobKind::Send { .. } => {
            s.push_str(&format!(
                "{:<24} ---> {:>9} {:>9} {:>9}\r\n",
                job.msg_name,
                job.stats.get_sent(),
                job.stats.get_sent_retrans(),
                job.stats.get_timeouts(),
            ));
        }
        JobKind::Recv { .. } => {
            s.push_str(&format!(
                "{:<24} <--- {:>9} {:>9}           {:>9}\r\n",
                job.msg_name,
                job.stats.get_recv(),
                job.stats.get_recv_retrans(),
                job.stats.get_unexpected(),
            ));
        }
        JobKind::Wait { ms } => {
            s.push_str(&format!("[Wait {ms:>5}]\r\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{compile, example_scenario_file};

    fn display() -> Display {
        Display::new(&Config::default())
    }

    fn scenario() -> Scenario {
        compile(example_scenario_file()).unwrap()
    }

    #[test]
    fn render_contains_counters_and_jobs() {
        let stats = StatsCollector::new();
        stats.record_session_created();
        stats.record_session_succ();

        let scn = scenario();
        scn.jobs[0].stats.inc_sent();
        scn.jobs[0].stats.inc_sent_retrans();

        let out = display().render(&stats, &scn, 10.0, false);
        assert!(out.contains("Total-Sessions:    1"));
        assert!(out.contains("Session-Completed: 1"));
        assert!(out.contains("create_session_req"));
        assert!(out.contains("--->"));
        assert!(out.contains("create_session_rsp"));
        assert!(out.contains("<---"));
        assert!(out.contains("[Wait  1000]"));
        assert!(out.contains("Pause-Traffic [p]"));
    }

    #[test]
    fn render_paused_legend_flips() {
        let stats = StatsCollector::new();
        let out = display().render(&stats, &scenario(), 10.0, true);
        assert!(out.contains("Resume-Traffic [c]"));
        assert!(!out.contains("Pause-Traffic [p]"));
    }

    #[test]
    fn every_job_appears_once() {
        let stats = StatsCollector::new();
        let scn = scenario();
        let out = display().render(&stats, &scn, 10.0, false);
        for job in &scn.jobs {
            if !matches!(job.kind, JobKind::Wait { .. }) {
                assert!(out.contains(&job.msg_name), "missing {}", job.msg_name);
            }
        }
    }

    #[test]
    fn run_returns_next_wake() {
        let d = display();
        let stats = StatsCollector::new();
        // writes to stdout; just verify the schedule arithmetic
        let next = d.run(5000, &stats, &scenario(), 10.0, false);
        assert_eq!(next, 5000 + d.refresh_ms());
    }
}
