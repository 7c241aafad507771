//! Transport error types.

use thiserror::Error;

/// Transport errors.
#[derive(Error, Debug)]
pub enum NetError {
    /// Malformed `host:port` endpoint. Not retried; the configuration is wrong.
    #[error("Invalid endpoint, must be \"host:port\": {0}")]
    InvalidEndpoint(String),

    /// Name resolution failed.
    #[error("Resolution failed for {endpoint}: {message}")]
    Resolution { endpoint: String, message: String },

    /// All candidate addresses refused the connection.
    #[error("Connect failed for {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// A frame announced a body larger than the allowed maximum.
    #[error("Frame too large: {size} bytes, max {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame body failed to decode into a message.
    #[error("Frame decode failed: {0}")]
    Decode(String),

    /// Underlying socket error, with the OS message.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<basalt_chain::ChainError> for NetError {
    fn from(err: basalt_chain::ChainError) -> Self {
        NetError::Decode(err.to_string())
    }
}

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;
