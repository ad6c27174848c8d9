//! AT command sub-protocol
//!
//! Command strings, acknowledgement lines and reply parsing for the modem's
//! configuration mode.

use swap_link::ModemSetup;

use crate::error::{GatewayError, Result};

/// Escape sequence; sent without a terminator
pub const ESCAPE: &str = "+++";
/// Return to data mode
pub const LEAVE_COMMAND_MODE: &str = "ATO";
pub const OK_COMMAND_MODE: &str = "OK-Command mode";
pub const OK_DATA_MODE: &str = "OK-Data mode";
/// Banner announcing the modem is ready
pub const MODEM_READY: &str = "Modem ready!";
pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";

pub const READ_CHANNEL: &str = "ATCH?";
pub const READ_NETWORK_ID: &str = "ATSW?";
pub const READ_ADDRESS: &str = "ATDA?";

/// Commands writing a full setup, in the order they are sent
pub fn write_commands(setup: &ModemSetup) -> [String; 3] {
    [
        format!("ATCH={:02}", setup.channel),
        format!("ATSW={:04X}", setup.network_id),
        format!("ATDA={:02X}", setup.address),
    ]
}

/// Reject `OK`/`ERROR` where a value was expected
pub fn check_read_reply<'a>(cmd: &str, reply: &'a str) -> Result<&'a str> {
    match reply {
        ERROR => Err(GatewayError::at_command(format!(
            "error received on {} command",
            cmd
        ))),
        OK => Err(GatewayError::at_command(format!(
            "unexpected OK in {} command",
            cmd
        ))),
        value => Ok(value.trim()),
    }
}

/// A write must be answered with `OK`
pub fn check_write_reply(cmd: &str, reply: &str) -> Result<()> {
    if reply == OK {
        Ok(())
    } else {
        Err(GatewayError::at_command(format!(
            "{} answered '{}'",
            cmd, reply
        )))
    }
}

pub fn parse_channel(reply: &str) -> Result<u8> {
    let value = check_read_reply(READ_CHANNEL, reply)?;
    value.parse::<u8>().map_err(|_| {
        GatewayError::at_command(format!(
            "malformed integer response '{}' to {}",
            value, READ_CHANNEL
        ))
    })
}

pub fn parse_network_id(reply: &str) -> Result<u16> {
    let value = check_read_reply(READ_NETWORK_ID, reply)?;
    u16::from_str_radix(value, 16).map_err(|_| {
        GatewayError::at_command(format!(
            "malformed hex response '{}' to {}",
            value, READ_NETWORK_ID
        ))
    })
}

pub fn parse_address(reply: &str) -> Result<u8> {
    let value = check_read_reply(READ_ADDRESS, reply)?;
    u8::from_str_radix(value, 16).map_err(|_| {
        GatewayError::at_command(format!(
            "malformed hex response '{}' to {}",
            value, READ_ADDRESS
        ))
    })
}
