//! Link Error Types
//!
//! Errors raised while decoding or encoding SWAP data.

use thiserror::Error;

/// Result type for swap-link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Link layer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A line that looked like a frame could not be decoded
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// A value could not be represented on the wire
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A byte/bit range falls outside the available data
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

impl From<hex::FromHexError> for LinkError {
    fn from(err: hex::FromHexError) -> Self {
        LinkError::Decoding(format!("invalid hex: {}", err))
    }
}

// Helper methods for creating errors
impl LinkError {
    pub fn decoding(msg: impl Into<String>) -> Self {
        LinkError::Decoding(msg.into())
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        LinkError::InvalidValue(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        LinkError::OutOfRange(msg.into())
    }

    /// Check if this error came from a malformed frame line
    pub fn is_decoding(&self) -> bool {
        matches!(self, LinkError::Decoding(_))
    }
}
