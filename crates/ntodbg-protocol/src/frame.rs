//! Byte-stuffed framing for the serial/TCP transport.
//!
//! ```text
//! 0x7e | escaped(payload ++ checksum) | 0x7e
//! ```
//!
//! Inside a frame `0x7e` and `0x7d` are sent as `0x7d, byte ^ 0x20`. The
//! checksum is the one's complement of the payload byte sum, so a receiver
//! accepts a frame when the sum of every unescaped byte equals `0xff`.

use tracing::trace;

use crate::error::{ProtocolError, Result};
use crate::header::HEADER_SIZE;
use crate::messages::DS_DATA_MAX_SIZE;

pub const FRAME_CHAR: u8 = 0x7e;
pub const ESC_CHAR: u8 = 0x7d;
const ESC_XOR: u8 = 0x20;

/// Room for the fixed part of any message ahead of its data.
const MAX_FIXED_BODY: usize = 64;

/// Longest unescaped frame (message plus checksum) a decoder accepts.
pub const MAX_FRAME_LEN: usize = HEADER_SIZE + MAX_FIXED_BODY + DS_DATA_MAX_SIZE + 1;

/// One's complement of the byte sum.
#[must_use]
pub fn checksum(payload: &[u8]) -> u8
{
    !payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn push_escaped(out: &mut Vec<u8>, byte: u8)
{
    if byte == FRAME_CHAR || byte == ESC_CHAR {
        out.push(ESC_CHAR);
        out.push(byte ^ ESC_XOR);
    } else {
        out.push(byte);
    }
}

/// Wrap a payload in frame characters with escaping and checksum.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8>
{
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FRAME_CHAR);
    for &byte in payload {
        push_escaped(&mut out, byte);
    }
    push_escaped(&mut out, checksum(payload));
    out.push(FRAME_CHAR);
    out
}

/// Incremental frame parser fed one byte at a time.
#[derive(Debug, Default)]
pub struct FrameDecoder
{
    buf: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl FrameDecoder
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Drop any partial frame.
    pub fn reset(&mut self)
    {
        self.buf.clear();
        self.in_frame = false;
        self.escaped = false;
    }

    /// Feed one byte.
    ///
    /// Returns `Some(Ok(payload))` when a frame closes with a valid checksum
    /// and `Some(Err(Checksum))` when it does not. Bytes outside a frame
    /// are line noise and ignored. A frame that grows past
    /// [`MAX_FRAME_LEN`] is dropped with `Some(Err(FrameTooLong))` and the
    /// decoder waits for the next frame character.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>>>
    {
        if byte == FRAME_CHAR {
            self.escaped = false;
            if !self.in_frame || self.buf.is_empty() {
                self.in_frame = true;
                return None;
            }
            let raw = std::mem::take(&mut self.buf);
            return Some(Self::finish(raw));
        }

        if !self.in_frame {
            return None;
        }

        if self.escaped {
            self.escaped = false;
            self.buf.push(byte ^ ESC_XOR);
        } else if byte == ESC_CHAR {
            self.escaped = true;
        } else {
            self.buf.push(byte);
        }

        if self.buf.len() > MAX_FRAME_LEN {
            trace!(limit = MAX_FRAME_LEN, "unterminated frame, resynchronising");
            self.reset();
            return Some(Err(ProtocolError::FrameTooLong { limit: MAX_FRAME_LEN }));
        }
        None
    }

    fn finish(mut raw: Vec<u8>) -> Result<Vec<u8>>
    {
        let sum = raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0xff {
            trace!(len = raw.len(), sum, "frame checksum mismatch");
            return Err(ProtocolError::Checksum { sum });
        }
        raw.pop();
        Ok(raw)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Vec<u8>>>
    {
        let mut decoder = FrameDecoder::new();
        bytes.iter().filter_map(|&b| decoder.push(b)).collect()
    }

    #[test]
    fn test_special_bytes_are_escaped()
    {
        let frame = encode_frame(&[0x7e, 0x01, 0x7d]);
        assert_eq!(&frame[..6], &[0x7e, 0x7d, 0x5e, 0x01, 0x7d, 0x5d]);
        let decoded = decode_all(&frame);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().unwrap(), &vec![0x7e, 0x01, 0x7d]);
    }

    #[test]
    fn test_checksum_makes_sum_ff()
    {
        let payload = [0x09, 0x00, 0x01, 0x01];
        let total = payload
            .iter()
            .fold(checksum(&payload), |acc, &b| acc.wrapping_add(b));
        assert_eq!(total, 0xff);
    }

    #[test]
    fn test_corrupted_frame_reports_checksum()
    {
        let mut frame = encode_frame(&[0x01, 0x02, 0x03]);
        frame[2] ^= 0x40;
        let decoded = decode_all(&frame);
        assert!(matches!(decoded[0], Err(ProtocolError::Checksum { .. })));
    }

    #[test]
    fn test_unterminated_frame_is_bounded()
    {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(FRAME_CHAR).is_none());
        let mut results = Vec::new();
        for _ in 0..MAX_FRAME_LEN * 3 {
            if let Some(result) = decoder.push(0x55) {
                results.push(result);
            }
        }
        assert!(matches!(
            results[0],
            Err(ProtocolError::FrameTooLong { limit }) if limit == MAX_FRAME_LEN
        ));
        assert_eq!(results.len(), 1);
        assert!(decoder.buf.len() <= MAX_FRAME_LEN);

        let frame = encode_frame(&[0x09, 0x00]);
        let decoded: Vec<_> = frame.iter().filter_map(|&b| decoder.push(b)).collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().unwrap(), &vec![0x09, 0x00]);
    }

    #[test]
    fn test_largest_message_fits()
    {
        let payload = vec![0x5a; HEADER_SIZE + 12 + DS_DATA_MAX_SIZE];
        let decoded = decode_all(&encode_frame(&payload));
        assert_eq!(decoded[0].as_ref().unwrap(), &payload);
    }

    #[test]
    fn test_noise_between_frames_ignored()
    {
        let mut stream = vec![0x11, 0x22];
        stream.extend(encode_frame(&[0x01]));
        stream.extend(encode_frame(&[0x02]));
        let decoded: Vec<_> = decode_all(&stream).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(decoded, vec![vec![0x01], vec![0x02]]);
    }
}
