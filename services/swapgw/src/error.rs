//! Error handling for the SWAP gateway

use swap_link::LinkError;
use thiserror::Error;

use crate::transport::TransportError;

/// Gateway error type
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Link-level failure; the modem driver closes on it
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame line
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Modem did not acknowledge a mode switch
    #[error("Mode switch timed out: {0}")]
    ModeTimeout(String),

    /// No reply to an AT request
    #[error("Response timed out: {0}")]
    ResponseTimeout(String),

    /// Modem replied `ERROR` or something unexpected
    #[error("AT command failed: {0}")]
    AtCommand(String),

    /// Operation needs an open modem
    #[error("Modem not open: {0}")]
    NotOpen(String),

    /// The driver or gateway was closed while waiting
    #[error("Closed: {0}")]
    Closed(String),

    #[error("No such unit: {0}")]
    NoSuchUnit(String),

    /// Product identity not known or not in the library
    #[error("Unresolved identity: {0}")]
    UnresolvedIdentity(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Register not found: {0}")]
    RegisterNotFound(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Value kind does not match the endpoint kind
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Invalid device definition
    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn decoding(msg: impl Into<String>) -> Self {
        GatewayError::Decoding(msg.into())
    }

    pub fn mode_timeout(msg: impl Into<String>) -> Self {
        GatewayError::ModeTimeout(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GatewayError::ResponseTimeout(msg.into())
    }

    pub fn at_command(msg: impl Into<String>) -> Self {
        GatewayError::AtCommand(msg.into())
    }

    pub fn not_open(msg: impl Into<String>) -> Self {
        GatewayError::NotOpen(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        GatewayError::Closed(msg.into())
    }

    pub fn no_such_unit(unit: impl std::fmt::Display) -> Self {
        GatewayError::NoSuchUnit(unit.to_string())
    }

    pub fn unresolved_identity(msg: impl Into<String>) -> Self {
        GatewayError::UnresolvedIdentity(msg.into())
    }

    pub fn node_not_found(address: u8) -> Self {
        GatewayError::NodeNotFound(format!("{:02X}", address))
    }

    pub fn register_not_found(address: u8, id: u8) -> Self {
        GatewayError::RegisterNotFound(format!("{:02X}/{}", address, id))
    }

    pub fn endpoint_not_found(name: impl std::fmt::Display) -> Self {
        GatewayError::EndpointNotFound(name.to_string())
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        GatewayError::TypeMismatch(msg.into())
    }

    pub fn definition(msg: impl Into<String>) -> Self {
        GatewayError::Definition(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        GatewayError::Io(msg.into())
    }

    /// Whether the operation may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::ModeTimeout(_) | GatewayError::ResponseTimeout(_)
        )
    }
}

impl From<LinkError> for GatewayError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Decoding(msg) => GatewayError::Decoding(msg),
            LinkError::InvalidValue(msg) => GatewayError::TypeMismatch(msg),
            LinkError::OutOfRange(msg) => GatewayError::Definition(msg),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Definition(format!("YAML: {}", err))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Definition(format!("JSON: {}", err))
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<common::Error> for GatewayError {
    fn from(err: common::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
