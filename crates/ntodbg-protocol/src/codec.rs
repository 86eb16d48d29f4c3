//! Endian-aware field reader and writer for message payloads.
//!
//! Payload structs on the wire are packed C structs whose multi-byte fields
//! follow the byte order announced in the header. [`PayloadWriter`] and
//! [`PayloadReader`] keep the cursor bookkeeping in one place so message
//! encoders read like the struct they describe.

use crate::error::{ProtocolError, Result};
use crate::header::Endian;

/// Appends fields to a payload buffer.
#[derive(Debug)]
pub struct PayloadWriter
{
    endian: Endian,
    buf: Vec<u8>,
}

impl PayloadWriter
{
    /// Create a writer producing fields in the given byte order.
    #[must_use]
    pub fn new(endian: Endian) -> Self
    {
        Self {
            endian,
            buf: Vec::with_capacity(32),
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self
    {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self
    {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self
    {
        self.u16(value as u16)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self
    {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self
    {
        self.u32(value as u32)
    }

    pub fn u64(&mut self, value: u64) -> &mut Self
    {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
        self
    }

    /// Raw bytes, copied verbatim.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self
    {
        self.buf.extend_from_slice(data);
        self
    }

    /// `count` zero bytes of padding.
    pub fn pad(&mut self, count: usize) -> &mut Self
    {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    /// A NUL-terminated string.
    pub fn cstr(&mut self, value: &str) -> &mut Self
    {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8>
    {
        self.buf
    }
}

/// Consumes fields from a received payload.
#[derive(Debug)]
pub struct PayloadReader<'a>
{
    endian: Endian,
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a>
{
    #[must_use]
    pub fn new(endian: Endian, data: &'a [u8]) -> Self
    {
        Self { endian, data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]>
    {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(ProtocolError::Truncated {
                expected: end,
                actual: self.data.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8>
    {
        Ok(self.take::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16>
    {
        let raw = self.take::<2>()?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn i16(&mut self) -> Result<i16>
    {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32>
    {
        let raw = self.take::<4>()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn i32(&mut self) -> Result<i32>
    {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64>
    {
        let raw = self.take::<8>()?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Skip `count` bytes of padding or reserved space.
    pub fn skip(&mut self, count: usize) -> Result<()>
    {
        let end = self.pos + count;
        if end > self.data.len() {
            return Err(ProtocolError::Truncated {
                expected: end,
                actual: self.data.len(),
            });
        }
        self.pos = end;
        Ok(())
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8]
    {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// A NUL-terminated string. A missing terminator consumes the rest.
    pub fn cstr(&mut self) -> String
    {
        let rest = self.rest();
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        String::from_utf8_lossy(&rest[..end]).into_owned()
    }

    #[must_use]
    pub fn remaining(&self) -> usize
    {
        self.data.len() - self.pos
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_writer_honours_byte_order()
    {
        let mut le = PayloadWriter::new(Endian::Little);
        le.u32(0x1122_3344);
        assert_eq!(le.finish(), vec![0x44, 0x33, 0x22, 0x11]);

        let mut be = PayloadWriter::new(Endian::Big);
        be.u32(0x1122_3344);
        assert_eq!(be.finish(), vec![0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_reader_reports_truncation()
    {
        let data = [1u8, 2, 3];
        let mut reader = PayloadReader::new(Endian::Little, &data);
        assert!(matches!(
            reader.u32(),
            Err(ProtocolError::Truncated { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_cstr_stops_at_nul()
    {
        let data = b"libc.so.3\0garbage";
        let mut reader = PayloadReader::new(Endian::Little, data);
        assert_eq!(reader.cstr(), "libc.so.3");
        assert_eq!(reader.remaining(), 0);
    }
}
