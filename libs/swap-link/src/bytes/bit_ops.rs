//! Bit-level access to register bytes

use crate::error::{LinkError, Result};

fn check_bit(bytes: &[u8], byte_offset: usize, bit_offset: u8) -> Result<()> {
    if bit_offset >= 8 {
        return Err(LinkError::out_of_range(format!(
            "bit offset {} outside 0..8",
            bit_offset
        )));
    }
    if byte_offset >= bytes.len() {
        return Err(LinkError::out_of_range(format!(
            "byte offset {} outside register of {} bytes",
            byte_offset,
            bytes.len()
        )));
    }
    Ok(())
}

/// Extract single bit from u8 value
#[inline]
pub fn extract_bit_u8(value: u8, bit_index: u8) -> bool {
    debug_assert!(bit_index < 8, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Return `value` with bit `bit_index` set or cleared; other bits are kept
#[inline]
pub fn with_bit_u8(value: u8, bit_index: u8, on: bool) -> u8 {
    debug_assert!(bit_index < 8, "Bit index out of range: {}", bit_index);
    let cleared = value & !(1 << bit_index);
    if on {
        cleared | (1 << bit_index)
    } else {
        cleared
    }
}

/// Test one bit of a register value
pub fn test_bit(bytes: &[u8], byte_offset: usize, bit_offset: u8) -> Result<bool> {
    check_bit(bytes, byte_offset, bit_offset)?;
    Ok(extract_bit_u8(bytes[byte_offset], bit_offset))
}

/// Set or clear one bit of a register value in place
pub fn write_bit(bytes: &mut [u8], byte_offset: usize, bit_offset: u8, on: bool) -> Result<()> {
    check_bit(bytes, byte_offset, bit_offset)?;
    bytes[byte_offset] = with_bit_u8(bytes[byte_offset], bit_offset, on);
    Ok(())
}
