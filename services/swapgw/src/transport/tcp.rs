//! TCP transport
//!
//! Reaches a modem exported by a serial-to-network bridge, or another
//! gateway's relay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::traits::{Connection, Transport, TransportError};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9001
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// Where the networked modem listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TcpTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() {
            return Err(TransportError::ConfigError("modem host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(TransportError::ConfigError(format!(
                "{}: port 0 is not connectable",
                self.host
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(TransportError::ConfigError(
                "connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The modem behind a TCP socket
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    address: String,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let address = config.address();
        Ok(Self { config, address })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> &str {
        "tcp"
    }

    fn name(&self) -> &str {
        &self.address
    }

    async fn connect(&mut self) -> Result<Connection, TransportError> {
        debug!("Connecting to {}", self.address);

        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match timeout(limit, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "Failed to connect to {}: {}",
                    self.address, e
                )))
            },
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "Connection to {} timed out after {:?}",
                    self.address, limit
                )))
            },
        };

        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::IoError(format!("Failed to set TCP_NODELAY: {e}")))?;

        info!("Connected to {}", self.address);
        Ok(Connection::from_stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_config_validation() {
        assert!(TcpTransportConfig::default().validate().is_ok());
        let config = TcpTransportConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TcpTransportConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"Modem ready!\r\n").await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut transport = TcpTransport::new(TcpTransportConfig {
            port,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(transport.name(), format!("127.0.0.1:{}", port));

        let mut conn = transport.connect().await.unwrap();
        let mut buf = [0u8; 14];
        conn.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Modem ready!\r\n");
        conn.writer.write_all(b"ATO\r").await.unwrap();
        conn.writer.flush().await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ATO\r");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(TcpTransportConfig {
            port,
            ..Default::default()
        })
        .unwrap();
        assert!(transport.connect().await.is_err());
    }
}
