//! Serial transport
//!
//! The modem ships as a USB serial adapter running 38400 8N1 with no flow
//! control; every line setting can be overridden for other boards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use super::traits::{Connection, Transport, TransportError};

fn default_baud_rate() -> u32 {
    38400
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    #[serde(alias = "None", alias = "n")]
    None,
    #[serde(alias = "Even", alias = "e")]
    Even,
    #[serde(alias = "Odd", alias = "o")]
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    #[serde(alias = "None")]
    None,
    /// XON/XOFF
    #[serde(alias = "Software")]
    Software,
    /// RTS/CTS
    #[serde(alias = "Hardware")]
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial line settings for the modem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialTransportConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
        }
    }
}

impl SerialTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        let problem = if self.port.trim().is_empty() {
            Some("serial port path is empty".to_string())
        } else if self.baud_rate == 0 {
            Some(format!("{}: baud rate must be non-zero", self.port))
        } else if self.data_bits().is_none() {
            Some(format!(
                "{}: {} data bits not supported (5-8)",
                self.port, self.data_bits
            ))
        } else if self.stop_bits().is_none() {
            Some(format!(
                "{}: {} stop bits not supported (1 or 2)",
                self.port, self.stop_bits
            ))
        } else {
            None
        };
        match problem {
            Some(msg) => Err(TransportError::ConfigError(msg)),
            None => Ok(()),
        }
    }

    fn data_bits(&self) -> Option<tokio_serial::DataBits> {
        let bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            _ => return None,
        };
        Some(bits)
    }

    fn stop_bits(&self) -> Option<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Some(tokio_serial::StopBits::One),
            2 => Some(tokio_serial::StopBits::Two),
            _ => None,
        }
    }
}

/// The modem on a local serial device
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
}

impl SerialTransport {
    pub fn new(config: SerialTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn transport_type(&self) -> &str {
        "serial"
    }

    fn name(&self) -> &str {
        &self.config.port
    }

    async fn connect(&mut self) -> Result<Connection, TransportError> {
        let cfg = &self.config;
        debug!(
            "Opening {} at {} baud ({}{:?}{})",
            cfg.port, cfg.baud_rate, cfg.data_bits, cfg.parity, cfg.stop_bits
        );

        let data_bits = cfg.data_bits().ok_or_else(|| {
            TransportError::ConfigError(format!("{} data bits not supported", cfg.data_bits))
        })?;
        let stop_bits = cfg.stop_bits().ok_or_else(|| {
            TransportError::ConfigError(format!("{} stop bits not supported", cfg.stop_bits))
        })?;

        #[allow(unused_mut)] // set_exclusive is unix-only
        let mut port = tokio_serial::new(&cfg.port, cfg.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(cfg.parity.into())
            .flow_control(cfg.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("cannot open {}: {}", cfg.port, e))
            })?;

        #[cfg(unix)]
        port.set_exclusive(false).map_err(|e| {
            TransportError::IoError(format!("{}: cannot clear exclusive mode: {}", cfg.port, e))
        })?;

        info!("Serial port {} open at {} baud", cfg.port, cfg.baud_rate);
        Ok(Connection::from_stream(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_8n1() {
        let config = SerialTransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.data_bits(), Some(tokio_serial::DataBits::Eight));
        assert_eq!(config.stop_bits(), Some(tokio_serial::StopBits::One));
        assert_eq!(config.parity, Parity::None);
    }

    #[test]
    fn test_rejects_bad_line_settings() {
        for config in [
            SerialTransportConfig {
                port: "  ".to_string(),
                ..Default::default()
            },
            SerialTransportConfig {
                data_bits: 9,
                ..Default::default()
            },
            SerialTransportConfig {
                stop_bits: 3,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(TransportError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn test_settings_from_yaml() {
        let config: SerialTransportConfig = serde_yaml::from_str(
            "port: /dev/ttyACM0\nparity: Even\nflow_control: hardware\nstop_bits: 2\n",
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(tokio_serial::Parity::from(config.parity), tokio_serial::Parity::Even);
        assert_eq!(
            tokio_serial::FlowControl::from(config.flow_control),
            tokio_serial::FlowControl::Hardware
        );
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::new(SerialTransportConfig {
            port: "/dev/does-not-exist-swap".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
