use crate::gtp::GtpError;

#[derive(Debug, thiserror::Error)]
pub enum GtpLoadTestError {
    #[error("Network error: {0}")]
    NetworkError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Scenario error: {0}")]
    ScenarioError(String),
    #[error("Codec error: {0}")]
    CodecError(#[from] GtpError),
    #[error("Unknown connection id: {0}")]
    UnknownConn(usize),
    #[error("Transport is closed")]
    TransportClosed,
}
