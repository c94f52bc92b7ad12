use clap::Parser;
use gtp_load_test::cli::{self, Cli};
use gtp_load_test::config;
use gtp_load_test::engine::Engine;
use gtp_load_test::error::GtpLoadTestError;
use gtp_load_test::transport::UdpTransport;

fn main() {
    let cli = Cli::parse();

    let result = match cli {
        Cli::Run { config: config_path, scenario, headless } => {
            run_simulator(&config_path, scenario.as_deref(), headless)
        }
        Cli::Validate { config: config_path } => cli::run_validate(&config_path),
        Cli::ExampleConfig => cli::run_example_config(),
        Cli::ExampleScenario => cli::run_example_scenario(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_simulator(
    config_path: &std::path::Path,
    scenario_override: Option<&std::path::Path>,
    headless: bool,
) -> Result<(), GtpLoadTestError> {
    let (cfg, scenario) = cli::load_inputs(config_path, scenario_override, headless)?;
    config::init_logging(&cfg)?;

    let local = cfg.local_endpoint()?;
    let transport = UdpTransport::bind(local.ip(), local.port(), cfg.local_socket_count)?;
    tracing::info!(
        local = %local,
        remote = %cfg.remote_endpoint()?,
        node = cfg.node_type.as_str(),
        scenario = %scenario.name,
        "starting simulator"
    );

    let mut engine = Engine::new(&cfg, scenario, transport)?;
    engine.run()?;

    // one last summary for the scrollback
    let snap = engine.stats().snapshot();
    println!(
        "sessions: {} created, {} completed, {} aborted, {} dead-call hits, {} unexpected",
        snap.sessions_created, snap.sessions_succ, snap.sessions_fail, snap.dead_calls,
        snap.unexpected,
    );
    Ok(())
}
