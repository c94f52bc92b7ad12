// Configuration manager module

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::GtpLoadTestError;
use crate::gtp::GTPC_PORT_DEFAULT;

/// Which mobile-core node this instance impersonates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "kebab-case")]
pub enum NodeType {
    Mme,
    Sgw,
    Pgw,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Mme => "MME",
            NodeType::Sgw => "SGW",
            NodeType::Pgw => "PGW",
        }
    }
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Mme
    }
}

/// Main configuration structure, loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_type: NodeType,
    pub local_ip: String,
    pub remote_ip: String,
    pub local_gtpc_port: u16,
    pub remote_gtpc_port: u16,
    /// Extra local sockets beyond the default one (responders answering
    /// multiple flows).
    pub local_socket_count: u16,
    pub scenario_file: Option<String>,
    /// GTP-C N3: maximum request retransmissions.
    pub n3_requests: u32,
    /// GTP-C T3: retransmission timer in milliseconds.
    pub t3_timer_ms: u64,
    /// Grace period after scenario completion before a session is reaped.
    pub dead_call_wait_ms: u64,
    pub display_refresh_ms: u64,
    /// Target session creation rate, sessions per second.
    pub session_rate: f64,
    /// Total sessions to create; 0 means none (pure responder).
    pub num_sessions: u64,
    /// First IMSI; subsequent sessions count up from here.
    pub imsi_base: u64,
    /// Ceiling on simultaneously live control tunnels.
    pub max_tunnels: usize,
    pub log_file: Option<String>,
    pub log_level: String,
    /// Suppress the interactive statistics screen (logs only).
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_type: NodeType::default(),
            local_ip: "127.0.0.1".to_string(),
            remote_ip: "127.0.0.1".to_string(),
            local_gtpc_port: GTPC_PORT_DEFAULT,
            remote_gtpc_port: GTPC_PORT_DEFAULT,
            local_socket_count: 1,
            scenario_file: None,
            n3_requests: 3,
            t3_timer_ms: 1000,
            dead_call_wait_ms: 5000,
            display_refresh_ms: 1000,
            session_rate: 10.0,
            num_sessions: 0,
            imsi_base: 262_01_0000000001,
            max_tunnels: 1_000_000,
            log_file: None,
            log_level: "info".to_string(),
            headless: false,
        }
    }
}

impl Config {
    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.local_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("local_ip is not a valid IP address: {}", self.local_ip));
        }
        if self.remote_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("remote_ip is not a valid IP address: {}", self.remote_ip));
        }
        if self.local_gtpc_port == 0 {
            errors.push("local_gtpc_port must be greater than 0".to_string());
        }
        if self.remote_gtpc_port == 0 {
            errors.push("remote_gtpc_port must be greater than 0".to_string());
        }
        if self.local_socket_count == 0 {
            errors.push("local_socket_count must be at least 1".to_string());
        }
        if self.t3_timer_ms == 0 {
            errors.push("t3_timer_ms must be greater than 0".to_string());
        }
        if self.display_refresh_ms == 0 {
            errors.push("display_refresh_ms must be greater than 0".to_string());
        }
        if self.num_sessions > 0 && self.session_rate <= 0.0 {
            errors.push("session_rate must be greater than 0 when num_sessions is set".to_string());
        }
        if self.imsi_base == 0 || self.imsi_base >= 1_000_000_000_000_000 {
            errors.push("imsi_base must encode at most 15 decimal digits".to_string());
        }
        if self.max_tunnels == 0 {
            errors.push("max_tunnels must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn local_endpoint(&self) -> Result<std::net::SocketAddr, GtpLoadTestError> {
        let ip: std::net::IpAddr = self
            .local_ip
            .parse()
            .map_err(|e| GtpLoadTestError::ConfigError(format!("invalid local_ip: {e}")))?;
        Ok(std::net::SocketAddr::new(ip, self.local_gtpc_port))
    }

    pub fn remote_endpoint(&self) -> Result<std::net::SocketAddr, GtpLoadTestError> {
        let ip: std::net::IpAddr = self
            .remote_ip
            .parse()
            .map_err(|e| GtpLoadTestError::ConfigError(format!("invalid remote_ip: {e}")))?;
        Ok(std::net::SocketAddr::new(ip, self.remote_gtpc_port))
    }
}

pub fn load_from_str(json: &str) -> Result<Config, GtpLoadTestError> {
    let config: Config = serde_json::from_str(json)
        .map_err(|e| GtpLoadTestError::ConfigError(format!("parse failure: {e}")))?;
    config
        .validate()
        .map_err(|errors| GtpLoadTestError::ConfigError(errors.join("; ")))?;
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<Config, GtpLoadTestError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GtpLoadTestError::ConfigError(format!("cannot read {}: {e}", path.display()))
    })?;
    load_from_str(&content)
}

/// Initialize logging. With a log file configured, traces go there (the
/// interactive display owns the terminal); otherwise stderr.
pub fn init_logging(config: &Config) -> Result<(), GtpLoadTestError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| {
                GtpLoadTestError::ConfigError(format!("cannot create log file {path}: {e}"))
            })?;
            registry
                .with(fmt::layer().with_writer(std::sync::Mutex::new(file)).with_ansi(false))
                .try_init()
                .map_err(|e| GtpLoadTestError::ConfigError(format!("failed to init logging: {e}")))?;
        }
        None => {
            registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| GtpLoadTestError::ConfigError(format!("failed to init logging: {e}")))?;
        }
    }
    Ok(())
}
