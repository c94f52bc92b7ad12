// CLI subcommand definitions using clap derive macros

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config;
use crate::error::GtpLoadTestError;
use crate::scenario;

/// GTP-C load and behavior simulator
#[derive(Parser, Debug, PartialEq)]
#[command(name = "gtp-load-test")]
pub enum Cli {
    /// Run the simulator
    Run {
        /// JSON configuration file path
        config: PathBuf,
        /// Override the scenario file named in the configuration
        #[arg(long)]
        scenario: Option<PathBuf>,
        /// Disable the interactive statistics screen
        #[arg(long)]
        headless: bool,
    },
    /// Check a configuration and its scenario without running
    Validate {
        /// JSON configuration file path
        config: PathBuf,
    },
    /// Print a ready-to-edit example configuration
    ExampleConfig,
    /// Print a ready-to-edit example scenario
    ExampleScenario,
}

/// Load config + scenario, applying CLI overrides.
pub fn load_inputs(
    config_path: &Path,
    scenario_override: Option<&Path>,
    headless: bool,
) -> Result<(config::Config, scenario::Scenario), GtpLoadTestError> {
    let mut cfg = config::load_from_file(config_path)?;
    if headless {
        cfg.headless = true;
    }

    let scenario = match scenario_override {
        Some(path) => scenario::load_from_file(path)?,
        None => {
            let path = cfg.scenario_file.clone().ok_or_else(|| {
                GtpLoadTestError::ConfigError(
                    "no scenario: set scenario_file in the config or pass --scenario".to_string(),
                )
            })?;
            scenario::load_from_file(Path::new(&path))?
        }
    };
    Ok((cfg, scenario))
}

/// The `validate` subcommand: parse everything, report, change nothing.
pub fn run_validate(config_path: &Path) -> Result<(), GtpLoadTestError> {
    let cfg = config::load_from_file(config_path)?;
    println!("config ok: node {}, {} -> {}", cfg.node_type.as_str(), cfg.local_ip, cfg.remote_ip);

    if let Some(path) = &cfg.scenario_file {
        let scn = scenario::load_from_file(Path::new(path))?;
        println!(
            "scenario ok: {} ({}, {} steps, {} procedures{})",
            scn.name,
            scn.if_type.as_str(),
            scn.jobs.len(),
            scn.procedures.len(),
            if scn.is_inbound_initiated() { ", inbound-initiated" } else { "" },
        );
    } else {
        println!("no scenario_file configured");
    }
    Ok(())
}

pub fn run_example_config() -> Result<(), GtpLoadTestError> {
    let cfg = config::Config {
        scenario_file: Some("scenario.json".to_string()),
        num_sessions: 1000,
        ..config::Config::default()
    };
    let json = serde_json::to_string_pretty(&cfg)
        .map_err(|e| GtpLoadTestError::ConfigError(e.to_string()))?;
    println!("{json}");
    Ok(())
}

pub fn run_example_scenario() -> Result<(), GtpLoadTestError> {
    let json = serde_json::to_string_pretty(&scenario::example_scenario_file())
        .map_err(|e| GtpLoadTestError::ScenarioError(e.to_string()))?;
    println!("{json}");
    Ok(())
}
