//! Gateway configuration
//!
//! Loaded through `common::config_loader`: defaults, then an optional file,
//! then `SWAPGW_*` environment variables (`__` separates nesting, e.g.
//! `SWAPGW_MODEM__POLL_ATTEMPTS=20`).

use common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swap_link::ModemSetup;

use crate::error::{GatewayError, Result};
use crate::transport::{SerialTransportConfig, TcpTransportConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SWAPGW";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub modem: ModemConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub relay: RelayConfig,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which link the modem is attached to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    Tcp,
}

/// Transport selection and per-kind settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default)]
    pub kind: TransportKind,

    #[serde(default)]
    pub serial: SerialTransportConfig,

    #[serde(default)]
    pub tcp: TcpTransportConfig,
}

/// Modem driver timing and startup behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Start in `Init` and wait for the ready banner before switching modes
    #[serde(default)]
    pub wait_for_ready: bool,

    /// Interval of the mode-switch polling window
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of intervals in the polling window
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Escape sequences sent before giving up on command mode
    #[serde(default = "default_escape_retries")]
    pub escape_retries: u32,

    /// Wait for the reply to one AT request
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Wait for the ready banner when a configuration exchange needs it
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Longest accepted line; longer input is discarded
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Radio configuration applied when the modem opens
    #[serde(default)]
    pub setup: Option<ModemSetup>,
}

impl ModemConfig {
    /// Bound on a single mode switch: `poll_attempts` x `poll_interval`
    pub fn mode_window(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.saturating_mul(u64::from(self.poll_attempts)))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Gateway behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Sender address on outbound QUERY/COMMAND frames
    #[serde(default = "default_local_address")]
    pub local_address: u8,

    /// Notification worker threads
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Pending notifications before the oldest is dropped
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,

    /// Frame buffer of each internal subscriber
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

/// Device definition library
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory of YAML/JSON device definitions
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// TCP relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_relay_bind")]
    pub bind: String,
}

// Default value functions
fn default_service_name() -> String {
    "swapgw".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_attempts() -> u32 {
    15
}

fn default_escape_retries() -> u32 {
    3
}

fn default_response_timeout_ms() -> u64 {
    2000
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_max_line_length() -> usize {
    512
}

fn default_local_address() -> u8 {
    0xFF
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_dispatch_queue() -> usize {
    1024
}

fn default_frame_buffer() -> usize {
    256
}

fn default_relay_bind() -> String {
    "127.0.0.1:9001".to_string()
}

// Default implementations
impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            wait_for_ready: false,
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            escape_retries: default_escape_retries(),
            response_timeout_ms: default_response_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            max_line_length: default_max_line_length(),
            setup: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            local_address: default_local_address(),
            dispatch_workers: default_dispatch_workers(),
            dispatch_queue: default_dispatch_queue(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_relay_bind(),
        }
    }
}

impl AppConfig {
    /// Load from defaults, an optional file and `SWAPGW_*` variables
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config: AppConfig = common::load_config(config_file, ENV_PREFIX)?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        match self.transport.kind {
            TransportKind::Serial => self.transport.serial.validate()?,
            TransportKind::Tcp => self.transport.tcp.validate()?,
        }

        let modem = &self.modem;
        if modem.poll_interval_ms == 0 || modem.poll_attempts == 0 {
            return Err(GatewayError::config(
                "modem polling window must be non-zero",
            ));
        }
        if modem.escape_retries == 0 {
            return Err(GatewayError::config("modem.escape_retries must be at least 1"));
        }
        if modem.response_timeout_ms == 0 {
            return Err(GatewayError::config("modem.response_timeout_ms must be non-zero"));
        }
        if modem.max_line_length < swap_link::MIN_FRAME_LINE_LEN {
            return Err(GatewayError::config(format!(
                "modem.max_line_length must be at least {}",
                swap_link::MIN_FRAME_LINE_LEN
            )));
        }

        let gateway = &self.gateway;
        if gateway.dispatch_workers == 0 {
            return Err(GatewayError::config("gateway.dispatch_workers must be non-zero"));
        }
        if gateway.dispatch_queue == 0 || gateway.frame_buffer == 0 {
            return Err(GatewayError::config(
                "gateway queue and buffer sizes must be non-zero",
            ));
        }
        if gateway.local_address == swap_link::BROADCAST_ADDRESS {
            return Err(GatewayError::config(
                "gateway.local_address cannot be the broadcast address",
            ));
        }

        if self.relay.enabled && self.relay.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(GatewayError::config(format!(
                "relay.bind '{}' is not a socket address",
                self.relay.bind
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.service.name, "swapgw");
        assert_eq!(config.modem.poll_interval_ms, 100);
        assert_eq!(config.modem.poll_attempts, 15);
        assert_eq!(config.modem.escape_retries, 3);
        assert_eq!(config.modem.mode_window(), Duration::from_millis(1500));
        assert_eq!(config.gateway.local_address, 0xFF);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
transport:
  kind: tcp
  tcp:
    host: 10.0.0.5
    port: 9100
modem:
  poll_attempts: 5
  setup:
    channel: 0
    network_id: 46406
    address: 1
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Tcp);
        assert_eq!(config.transport.tcp.address(), "10.0.0.5:9100");
        assert_eq!(config.modem.poll_attempts, 5);
        assert_eq!(config.modem.poll_interval_ms, 100);
        assert_eq!(config.modem.setup, Some(ModemSetup::new(0, 0xB546, 1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.modem.poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.dispatch_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transport.serial.port.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.enabled = true;
        config.relay.bind = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "swapgw.yaml",
                "transport:\n  serial:\n    port: /dev/ttyACM0\n",
            )?;
            jail.set_env("SWAPGW_MODEM__POLL_ATTEMPTS", "7");
            jail.set_env("SWAPGW_GATEWAY__LOCAL_ADDRESS", "1");

            let config =
                AppConfig::load(Some(Path::new("swapgw.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.transport.serial.port, "/dev/ttyACM0");
            assert_eq!(config.modem.poll_attempts, 7);
            assert_eq!(config.gateway.local_address, 1);
            Ok(())
        });
    }
}
