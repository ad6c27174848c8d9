//! SWAP Link Library
//!
//! Transport-agnostic building blocks of the SWAP wire protocol used by
//! low-power wireless sensor nodes.
//!
//! # Architecture
//!
//! This library provides:
//! - **Frame Codec**: `Frame` parsing/serialization for the modem line format
//! - **Standard Registers**: Fixed-meaning registers every node exposes
//! - **Modem Setup**: Radio channel / network id / address value type
//! - **Bytes Utilities**: Bit and big-endian field helpers for register values
//!
//! Nothing in here performs I/O; the modem driver and gateway live in the
//! `swapgw` service crate.

pub mod bytes;
pub mod error;
pub mod frame;
pub mod registers;
pub mod setup;

// Re-export core types
pub use error::{LinkError, Result};
pub use frame::{Frame, FrameType, BROADCAST_ADDRESS, MIN_FRAME_LINE_LEN};
pub use registers::{ProductCode, StandardRegister};
pub use setup::ModemSetup;
