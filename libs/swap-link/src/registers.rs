//! Standard SWAP registers
//!
//! Every node exposes the same first eleven registers with fixed meanings.
//! Application registers start right after them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinkError, Result};

/// First register id available for product-specific registers
pub const FIRST_APPLICATION_REGISTER: u8 = 11;

/// Registers with a fixed meaning on every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardRegister {
    ProductCode,
    HardwareVersion,
    FirmwareVersion,
    SystemState,
    FrequencyChannel,
    SecurityOption,
    SecurityPassword,
    SecurityNonce,
    NetworkId,
    DeviceAddress,
    PeriodicTxInterval,
}

impl StandardRegister {
    pub const ALL: [StandardRegister; 11] = [
        StandardRegister::ProductCode,
        StandardRegister::HardwareVersion,
        StandardRegister::FirmwareVersion,
        StandardRegister::SystemState,
        StandardRegister::FrequencyChannel,
        StandardRegister::SecurityOption,
        StandardRegister::SecurityPassword,
        StandardRegister::SecurityNonce,
        StandardRegister::NetworkId,
        StandardRegister::DeviceAddress,
        StandardRegister::PeriodicTxInterval,
    ];

    /// Register id on the node
    pub fn id(self) -> u8 {
        match self {
            StandardRegister::ProductCode => 0,
            StandardRegister::HardwareVersion => 1,
            StandardRegister::FirmwareVersion => 2,
            StandardRegister::SystemState => 3,
            StandardRegister::FrequencyChannel => 4,
            StandardRegister::SecurityOption => 5,
            StandardRegister::SecurityPassword => 6,
            StandardRegister::SecurityNonce => 7,
            StandardRegister::NetworkId => 8,
            StandardRegister::DeviceAddress => 9,
            StandardRegister::PeriodicTxInterval => 10,
        }
    }

    /// Declared value length in bytes
    pub fn length(self) -> usize {
        match self {
            StandardRegister::ProductCode => 8,
            StandardRegister::HardwareVersion | StandardRegister::FirmwareVersion => 4,
            StandardRegister::SecurityPassword
            | StandardRegister::NetworkId
            | StandardRegister::PeriodicTxInterval => 2,
            _ => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            StandardRegister::ProductCode => "Product code",
            StandardRegister::HardwareVersion => "Hardware version",
            StandardRegister::FirmwareVersion => "Firmware version",
            StandardRegister::SystemState => "System state",
            StandardRegister::FrequencyChannel => "Frequency channel",
            StandardRegister::SecurityOption => "Security option",
            StandardRegister::SecurityPassword => "Security password",
            StandardRegister::SecurityNonce => "Security nonce",
            StandardRegister::NetworkId => "Network ID",
            StandardRegister::DeviceAddress => "Device address",
            StandardRegister::PeriodicTxInterval => "Periodic Tx interval",
        }
    }
}

impl fmt::Display for StandardRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Product identity carried by the product-code register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductCode {
    pub manufacturer_id: u32,
    pub product_id: u32,
}

impl ProductCode {
    pub fn new(manufacturer_id: u32, product_id: u32) -> Self {
        Self {
            manufacturer_id,
            product_id,
        }
    }

    /// Parse the 8-byte register value (manufacturer id then product id, both big-endian)
    pub fn from_register(value: &[u8]) -> Result<Self> {
        if value.len() < StandardRegister::ProductCode.length() {
            return Err(LinkError::out_of_range(format!(
                "product code needs 8 bytes, got {}",
                value.len()
            )));
        }
        Ok(Self {
            manufacturer_id: u32::from_be_bytes([value[0], value[1], value[2], value[3]]),
            product_id: u32::from_be_bytes([value[4], value[5], value[6], value[7]]),
        })
    }

    pub fn to_register(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.manufacturer_id.to_be_bytes());
        out[4..].copy_from_slice(&self.product_id.to_be_bytes());
        out
    }
}

impl fmt::Display for ProductCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:{:08X}", self.manufacturer_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_register_ids_are_positional() {
        for (idx, reg) in StandardRegister::ALL.iter().enumerate() {
            assert_eq!(reg.id() as usize, idx);
            assert_eq!(StandardRegister::from_id(reg.id()), Some(*reg));
        }
        assert_eq!(StandardRegister::from_id(FIRST_APPLICATION_REGISTER), None);
    }

    #[test]
    fn test_product_code_parse() {
        let code = ProductCode::from_register(&[0, 0, 0, 1, 0, 0, 0, 2]).unwrap();
        assert_eq!(code, ProductCode::new(1, 2));
        assert_eq!(code.to_string(), "00000001:00000002");
        assert_eq!(code.to_register(), [0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_product_code_too_short() {
        assert!(ProductCode::from_register(&[0, 0, 0, 1]).is_err());
    }
}
