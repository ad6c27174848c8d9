//! Line splitting for the modem byte stream

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

/// Splits the modem stream into text lines
///
/// Lines end at CR, LF or CRLF. Empty lines are skipped. A line longer than
/// the limit is discarded up to its terminator instead of failing the stream.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }
}

fn is_terminator(b: &u8) -> bool {
    *b == b'\r' || *b == b'\n'
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(is_terminator) else {
                if src.len() > self.max_length {
                    if !self.discarding {
                        warn!(
                            "Discarding line longer than {} bytes",
                            self.max_length
                        );
                    }
                    self.discarding = true;
                    src.clear();
                }
                return Ok(None);
            };

            let line = src.split_to(pos);
            src.advance(1);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_length {
                warn!("Discarding line longer than {} bytes", self.max_length);
                continue;
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text.to_string()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // Unterminated tail at end of stream
        if self.discarding || src.is_empty() {
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_mixed_terminators_and_empty_lines() {
        let mut codec = LineCodec::new(64);
        let lines = decode_all(&mut codec, b"Modem ready!\r\n\r\nOK\rB547\npartial");
        assert_eq!(lines, vec!["Modem ready!", "OK", "B547"]);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"(1A2B)0001"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"000001\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("(1A2B)0001000001")
        );
    }

    #[test]
    fn test_overlong_line_is_skipped() {
        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789ABCDEF"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"XYZ\r\nOK\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("OK"));
    }

    #[test]
    fn test_eof_flushes_tail() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"OK-Data mode"[..]);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().as_deref(),
            Some("OK-Data mode")
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
