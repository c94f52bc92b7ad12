use thiserror::Error;

/// Errors produced by the GTP-C codec layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GtpError {
    #[error("buffer too short: needed {needed}, available {available}")]
    BufferTooShort { needed: usize, available: usize },
    #[error("unsupported GTP version: {0}")]
    InvalidVersion(u8),
    #[error("unknown message type: {0}")]
    InvalidMessageType(u8),
    #[error("malformed IE (type {ie_type}): {reason}")]
    MalformedIe { ie_type: u8, reason: &'static str },
    #[error("required IE missing: type {0}")]
    MissingIe(u8),
}

pub type GtpResult<T> = Result<T, GtpError>;
