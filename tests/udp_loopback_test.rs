// Real-socket end-to-end: a generator engine and a responder engine talk
// GTP-C to each other over loopback UDP. Virtual time is stepped faster
// than wall time; duplicate handling absorbs any retransmissions that
// causes.

use std::time::Duration;

use gtp_load_test::config::{Config, NodeType};
use gtp_load_test::engine::Engine;
use gtp_load_test::scenario::{compile, IfType, Scenario, ScenarioFile, StepDef};
use gtp_load_test::transport::UdpTransport;

const SESSIONS: u64 = 5;

fn send(msg: &str, bearers: Vec<u8>) -> StepDef {
    StepDef::Send { msg: msg.to_string(), bearers, ies: Vec::new() }
}

fn recv(msg: &str) -> StepDef {
    StepDef::Recv { msg: msg.to_string() }
}

fn generator_scenario() -> Scenario {
    compile(ScenarioFile {
        name: "loopback-gen".into(),
        interface: IfType::S11Mme,
        steps: vec![send("create_session_req", vec![5]), recv("create_session_rsp")],
    })
    .unwrap()
}

fn responder_scenario() -> Scenario {
    compile(ScenarioFile {
        name: "loopback-rsp".into(),
        interface: IfType::S11S4Sgw,
        steps: vec![recv("create_session_req"), send("create_session_rsp", vec![])],
    })
    .unwrap()
}

#[test]
fn generator_and_responder_over_loopback() {
    let localhost = "127.0.0.1".parse().unwrap();
    let gen_transport = UdpTransport::bind(localhost, 0, 1).expect("generator bind");
    let rsp_transport = UdpTransport::bind(localhost, 0, 1).expect("responder bind");
    let gen_port = gen_transport.local_addr(0).unwrap().port();
    let rsp_port = rsp_transport.local_addr(0).unwrap().port();

    let gen_cfg = Config {
        node_type: NodeType::Mme,
        local_gtpc_port: gen_port,
        remote_gtpc_port: rsp_port,
        num_sessions: SESSIONS,
        session_rate: 100_000.0,
        t3_timer_ms: 500,
        dead_call_wait_ms: 100,
        headless: true,
        ..Config::default()
    };
    let rsp_cfg = Config {
        node_type: NodeType::Sgw,
        local_gtpc_port: rsp_port,
        remote_gtpc_port: gen_port,
        num_sessions: 0,
        dead_call_wait_ms: 100,
        headless: true,
        ..Config::default()
    };

    let mut generator =
        Engine::new(&gen_cfg, generator_scenario(), gen_transport).expect("generator engine");
    let mut responder =
        Engine::new(&rsp_cfg, responder_scenario(), rsp_transport).expect("responder engine");
    generator.start(0);
    responder.start(0);

    let mut t = 0u64;
    for _ in 0..500 {
        t += 10;
        generator.step_at(t).expect("generator step");
        responder.step_at(t).expect("responder step");
        if generator.finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(generator.finished(), "generator did not drain in time");
    let gen_snap = generator.stats().snapshot();
    assert_eq!(gen_snap.sessions_created, SESSIONS);
    assert_eq!(gen_snap.sessions_succ, SESSIONS);
    assert_eq!(gen_snap.sessions_fail, 0);

    // let the responder's dead-call waits run out
    for _ in 0..10 {
        t += 200;
        responder.step_at(t).expect("responder settle");
        std::thread::sleep(Duration::from_millis(1));
    }
    let rsp_snap = responder.stats().snapshot();
    assert_eq!(rsp_snap.sessions_created, SESSIONS);
    assert_eq!(rsp_snap.sessions_succ, SESSIONS);
    assert_eq!(responder.registry().len(), 0, "responder sessions reaped");
    assert!(responder.tunnels().is_empty());
}
