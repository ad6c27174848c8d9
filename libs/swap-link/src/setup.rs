//! Modem configuration value type

use serde::{Deserialize, Serialize};
use std::fmt;

/// The modem's own radio configuration
///
/// Only ever changed through an explicit configuration exchange with the
/// modem, never inferred from traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModemSetup {
    /// Radio channel
    pub channel: u8,
    /// Network id (synchronization word)
    pub network_id: u16,
    /// Address of the modem on the network
    pub address: u8,
}

impl ModemSetup {
    pub fn new(channel: u8, network_id: u16, address: u8) -> Self {
        Self {
            channel,
            network_id,
            address,
        }
    }
}

impl fmt::Display for ModemSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel={} network_id={:04X} address={:02X}",
            self.channel, self.network_id, self.address
        )
    }
}
