//! Modem driver
//!
//! One serial line carries two protocols: transparent SWAP data frames and
//! the modem's own AT configuration commands. The driver tracks which one the
//! line is in and multiplexes between them.
//!
//! ```text
//!            ready banner              +++ / OK-Command mode
//!   Init ───────────────────▶ Data ◀──────────────────────────▶ Command
//!                                        ATO / OK-Data mode
//!                                        or any data frame
//! ```

pub mod at;
pub mod codec;
pub mod driver;

use async_trait::async_trait;
use std::fmt;
use swap_link::Frame;

use crate::error::Result;

pub use codec::LineCodec;
pub use driver::Modem;

/// How the driver currently interprets incoming lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemMode {
    /// Waiting for the ready banner
    Init,
    /// Lines are data frames
    Data,
    /// Lines are replies to AT requests
    Command,
}

impl fmt::Display for ModemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModemMode::Init => "Init",
            ModemMode::Data => "Data",
            ModemMode::Command => "Command",
        };
        f.write_str(name)
    }
}

/// Something that happened on the modem link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// A frame arrived from the network
    Received(Frame),
    /// A frame was written to the modem
    Sent(Frame),
    /// The driver closed, either on request or because the link failed
    Closed,
}

/// Outbound frame path used by registers
#[async_trait]
pub trait FrameSender: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<()>;
}
