//! Register value utilities
//!
//! Helpers for reading and writing fields inside a register's byte array.
//! Register values are big-endian on the wire; bits inside a byte are
//! numbered from the least significant bit (bit 0) up to bit 7.
//!
//! Every write helper touches only the addressed field and leaves the rest
//! of the buffer as it was.

pub mod bit_ops;
pub mod conversions;

pub use bit_ops::*;
pub use conversions::*;
