//! SWAP frame codec
//!
//! The modem reports every frame it hears as one text line:
//!
//! ```text
//! (RRLL)DDSSHNFFAAIIVV...
//!  │ │  │ │ │ │ │ │ └─ payload (register value), 0..n bytes
//!  │ │  │ │ │ │ │ └─── register id
//!  │ │  │ │ │ │ └───── register address (node owning the register)
//!  │ │  │ │ │ └─────── function (0 STATUS, 1 QUERY, 2 COMMAND)
//!  │ │  │ │ └───────── security nonce
//!  │ │  │ └─────────── hop count (high nibble), security flags (low nibble)
//!  │ │  └───────────── sender (source) address
//!  │ └──────────────── LQI
//!  └────────────────── RSSI
//! ```
//!
//! Frames written to the modem use the same hex body without the
//! parenthesised radio-quality prefix.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LinkError, Result};

/// Shortest line the reader treats as a frame candidate
pub const MIN_FRAME_LINE_LEN: usize = 12;

/// Destination address used by nodes for unsolicited STATUS frames
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Frame header length in bytes (everything before the payload)
const HEADER_LEN: usize = 7;

/// Length of the `(RRLL)` radio-quality prefix
const PREFIX_LEN: usize = 6;

/// SWAP function code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameType {
    /// Register value report, always carries the full register value
    Status,
    /// Request for a STATUS, carries no payload
    Query,
    /// Request to write a register, carries the value to write
    Command,
}

impl FrameType {
    /// Function code on the wire
    pub fn code(self) -> u8 {
        match self {
            FrameType::Status => 0,
            FrameType::Query => 1,
            FrameType::Command => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameType::Status),
            1 => Some(FrameType::Query),
            2 => Some(FrameType::Command),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Status => "STATUS",
            FrameType::Query => "QUERY",
            FrameType::Command => "COMMAND",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One SWAP protocol message
///
/// Frames are immutable once built; use the constructors and the `with_*`
/// builders to create them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    kind: FrameType,
    receiver: u8,
    sender: u8,
    hop_count: u8,
    security: u8,
    nonce: u8,
    register_address: u8,
    register_id: u8,
    payload: Bytes,
    rssi: u8,
    lqi: u8,
}

impl Frame {
    /// Create a frame with no routing/security information
    pub fn new(
        kind: FrameType,
        sender: u8,
        receiver: u8,
        register_address: u8,
        register_id: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            receiver,
            sender,
            hop_count: 0,
            security: 0,
            nonce: 0,
            register_address,
            register_id,
            payload: payload.into(),
            rssi: 0,
            lqi: 0,
        }
    }

    /// STATUS broadcast from `node` reporting the value of one of its registers
    pub fn status(node: u8, register_id: u8, value: impl Into<Bytes>) -> Self {
        Self::new(
            FrameType::Status,
            node,
            BROADCAST_ADDRESS,
            node,
            register_id,
            value,
        )
    }

    /// QUERY from `sender` asking `node` to report a register
    pub fn query(sender: u8, node: u8, register_id: u8) -> Self {
        Self::new(FrameType::Query, sender, node, node, register_id, Bytes::new())
    }

    /// COMMAND from `sender` asking `node` to write a register
    pub fn command(sender: u8, node: u8, register_id: u8, value: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Command, sender, node, node, register_id, value)
    }

    /// Attach hop count, security flags and nonce
    ///
    /// Hop count and security flags share one byte on the wire, so each must
    /// fit in a nibble.
    pub fn with_routing(mut self, hop_count: u8, security: u8, nonce: u8) -> Result<Self> {
        if hop_count > 0x0F || security > 0x0F {
            return Err(LinkError::invalid_value(format!(
                "hop count {} / security {} must fit in 4 bits",
                hop_count, security
            )));
        }
        self.hop_count = hop_count;
        self.security = security;
        self.nonce = nonce;
        Ok(self)
    }

    /// Attach the radio quality reported by the modem
    pub fn with_radio(mut self, rssi: u8, lqi: u8) -> Self {
        self.rssi = rssi;
        self.lqi = lqi;
        self
    }

    pub fn kind(&self) -> FrameType {
        self.kind
    }

    pub fn sender(&self) -> u8 {
        self.sender
    }

    pub fn receiver(&self) -> u8 {
        self.receiver
    }

    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    pub fn security(&self) -> u8 {
        self.security
    }

    pub fn nonce(&self) -> u8 {
        self.nonce
    }

    pub fn register_address(&self) -> u8 {
        self.register_address
    }

    pub fn register_id(&self) -> u8 {
        self.register_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    pub fn lqi(&self) -> u8 {
        self.lqi
    }

    /// Check whether a transport line should be handed to [`Frame::decode`]
    ///
    /// Anything else belongs to the AT command/response path.
    pub fn is_frame_line(line: &str) -> bool {
        !line.is_empty() && line.starts_with('(') && line.len() >= MIN_FRAME_LINE_LEN
    }

    /// Decode a line received from the modem
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim();
        if !line.is_ascii() {
            return Err(LinkError::decoding(format!(
                "non-ASCII characters in '{}'",
                line
            )));
        }
        if !line.starts_with('(') {
            return Err(LinkError::decoding(format!("missing '(' in '{}'", line)));
        }
        if line.len() < PREFIX_LEN || line.as_bytes()[PREFIX_LEN - 1] != b')' {
            return Err(LinkError::decoding(format!(
                "malformed radio quality prefix in '{}'",
                line
            )));
        }

        let quality = hex::decode(&line[1..PREFIX_LEN - 1])?;
        Self::parse_body(&line[PREFIX_LEN..], quality[0], quality[1])
    }

    /// Encode to the line format produced by the modem
    ///
    /// Exact inverse of [`Frame::decode`].
    pub fn encode(&self) -> String {
        format!("({:02X}{:02X}){}", self.rssi, self.lqi, self.to_modem_text())
    }

    /// Hex body as written to the modem (no radio-quality prefix)
    pub fn to_modem_text(&self) -> String {
        let mut raw = Vec::with_capacity(HEADER_LEN + self.payload.len());
        raw.extend_from_slice(&[
            self.receiver,
            self.sender,
            (self.hop_count << 4) | (self.security & 0x0F),
            self.nonce,
            self.kind.code(),
            self.register_address,
            self.register_id,
        ]);
        raw.extend_from_slice(&self.payload);
        hex::encode_upper(raw)
    }

    /// Parse the prefix-less form produced by [`Frame::to_modem_text`]
    pub fn from_modem_text(text: &str) -> Result<Self> {
        let text = text.trim();
        if !text.is_ascii() {
            return Err(LinkError::decoding(format!(
                "non-ASCII characters in '{}'",
                text
            )));
        }
        Self::parse_body(text, 0, 0)
    }

    fn parse_body(body: &str, rssi: u8, lqi: u8) -> Result<Self> {
        if body.len() % 2 != 0 {
            return Err(LinkError::decoding(format!(
                "odd number of hex digits in '{}'",
                body
            )));
        }

        let raw = hex::decode(body)?;
        if raw.len() < HEADER_LEN {
            return Err(LinkError::decoding(format!(
                "frame too short: {} bytes, header needs {}",
                raw.len(),
                HEADER_LEN
            )));
        }

        let kind = FrameType::from_code(raw[4])
            .ok_or_else(|| LinkError::decoding(format!("unknown function code {:02X}", raw[4])))?;

        Ok(Self {
            kind,
            receiver: raw[0],
            sender: raw[1],
            hop_count: raw[2] >> 4,
            security: raw[2] & 0x0F,
            nonce: raw[3],
            register_address: raw[5],
            register_id: raw[6],
            payload: Bytes::copy_from_slice(&raw[HEADER_LEN..]),
            rssi,
            lqi,
        })
    }
}

impl FromStr for Frame {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Frame::decode(s)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02X}->{:02X} reg {:02X}.{:02X} [{}]",
            self.kind,
            self.sender,
            self.receiver,
            self.register_address,
            self.register_id,
            hex::encode_upper(&self.payload)
        )
    }
}
