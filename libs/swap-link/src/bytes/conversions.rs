//! Big-endian field conversions
//!
//! Integer fields are 1 to 8 bytes wide, most significant byte first.
//! Text fields are fixed width and padded with NUL bytes.

use crate::error::{LinkError, Result};

/// Widest integer field that fits a `u64`
pub const MAX_INTEGER_WIDTH: usize = 8;

fn check_field(len: usize, offset: usize, width: usize) -> Result<()> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(()),
        _ => Err(LinkError::out_of_range(format!(
            "field {}..{} outside register of {} bytes",
            offset,
            offset.saturating_add(width),
            len
        ))),
    }
}

fn check_integer_width(width: usize) -> Result<()> {
    if width == 0 || width > MAX_INTEGER_WIDTH {
        return Err(LinkError::invalid_value(format!(
            "integer width {} outside 1..={}",
            width, MAX_INTEGER_WIDTH
        )));
    }
    Ok(())
}

/// Read an unsigned big-endian integer of `width` bytes starting at `offset`
pub fn read_be_uint(bytes: &[u8], offset: usize, width: usize) -> Result<u64> {
    check_integer_width(width)?;
    check_field(bytes.len(), offset, width)?;
    Ok(bytes[offset..offset + width]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Write `value` as a big-endian integer of `width` bytes at `offset`
///
/// Only the low `width` bytes of `value` are kept.
pub fn write_be_uint(bytes: &mut [u8], offset: usize, width: usize, value: u64) -> Result<()> {
    check_integer_width(width)?;
    check_field(bytes.len(), offset, width)?;
    let be = value.to_be_bytes();
    bytes[offset..offset + width].copy_from_slice(&be[MAX_INTEGER_WIDTH - width..]);
    Ok(())
}

/// Copy the `width` bytes of a field out of a register value
pub fn read_field(bytes: &[u8], offset: usize, width: usize) -> Result<&[u8]> {
    check_field(bytes.len(), offset, width)?;
    Ok(&bytes[offset..offset + width])
}

/// Place `data` into a `width`-byte field, truncating or NUL-padding as needed
pub fn write_field(bytes: &mut [u8], offset: usize, width: usize, data: &[u8]) -> Result<()> {
    check_field(bytes.len(), offset, width)?;
    let field = &mut bytes[offset..offset + width];
    let n = data.len().min(width);
    field[..n].copy_from_slice(&data[..n]);
    field[n..].fill(0);
    Ok(())
}

/// Decode a fixed-width text field, dropping trailing NUL and space fill
pub fn decode_text(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Truncate `text` to at most `width` bytes without splitting a character
pub fn truncate_text(text: &str, width: usize) -> &str {
    if text.len() <= width {
        return text;
    }
    let mut end = width;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_be_uint() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        assert_eq!(read_be_uint(&data, 0, 1).unwrap(), 0x12);
        assert_eq!(read_be_uint(&data, 1, 2).unwrap(), 0x3456);
        assert_eq!(read_be_uint(&data, 1, 4).unwrap(), 0x3456_789A);
        assert!(read_be_uint(&data, 3, 3).is_err());
        assert!(read_be_uint(&data, 0, 0).is_err());
    }

    #[test]
    fn test_write_be_uint_preserves_neighbours() {
        for width in 1..=4usize {
            let mut data = [0xEEu8; 6];
            let value = 0x0102_0304u64 & ((1u64 << (8 * width)) - 1);
            write_be_uint(&mut data, 1, width, value).unwrap();
            assert_eq!(read_be_uint(&data, 1, width).unwrap(), value);
            assert_eq!(data[0], 0xEE);
            assert!(data[1 + width..].iter().all(|b| *b == 0xEE));
        }
    }

    #[test]
    fn test_write_be_uint_truncates_to_width() {
        let mut data = [0u8; 2];
        write_be_uint(&mut data, 0, 2, 0x1_2345).unwrap();
        assert_eq!(data, [0x23, 0x45]);
    }

    #[test]
    fn test_write_field_pads_and_truncates() {
        let mut data = *b"XXabcdefYY";
        write_field(&mut data, 2, 6, b"hi").unwrap();
        assert_eq!(&data, b"XXhi\0\0\0\0YY");

        write_field(&mut data, 2, 6, b"toolongvalue").unwrap();
        assert_eq!(&data, b"XXtoolonYY");
    }

    #[test]
    fn test_decode_text_trims_fill() {
        assert_eq!(decode_text(b"node\0\0"), "node");
        assert_eq!(decode_text(b"node  "), "node");
        assert_eq!(decode_text(b"\0\0\0"), "");
    }

    #[test]
    fn test_truncate_text_exact_width() {
        assert_eq!(truncate_text("abcdef", 4), "abcd");
        assert_eq!(truncate_text("abc", 4), "abc");
        // 'é' is two bytes; never split it
        assert_eq!(truncate_text("abé", 3), "ab");
    }
}
