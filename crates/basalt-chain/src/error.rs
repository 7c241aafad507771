//! Chain type errors.

use thiserror::Error;

/// Errors from chain type codecs.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Not enough bytes to decode a value.
    #[error("Truncated input: {0}")]
    Truncated(&'static str),

    /// A length prefix exceeds the remaining input.
    #[error("Invalid length prefix for {0}")]
    InvalidLength(&'static str),

    /// A string field is not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Result type for chain type operations.
pub type ChainResult<T> = Result<T, ChainError>;
