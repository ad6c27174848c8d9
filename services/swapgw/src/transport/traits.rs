//! Transport Layer Traits

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError(err.to_string())
    }
}

/// Read half of an open transport
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open transport
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open byte stream, split for a dedicated reader task
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Connection {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self { reader, writer }
    }

    /// Split any duplex stream into a connection
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(Box::new(reader), Box::new(writer))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens the byte stream a modem is attached to
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Get transport type identifier
    fn transport_type(&self) -> &str;

    /// Get human-readable transport name (port path, host:port ...)
    fn name(&self) -> &str;

    /// Open the link
    ///
    /// May be called again after the previous connection was dropped.
    async fn connect(&mut self) -> Result<Connection, TransportError>;
}
