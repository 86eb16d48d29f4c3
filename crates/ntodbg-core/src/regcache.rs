//! Register cache owned by a debugging session.
//!
//! Values are kept as raw bytes in target byte order, exactly as the codecs
//! supply them. A register is either valid (fetched or written since the
//! last invalidation) or unknown.

use ntodbg_protocol::Endian;
use smallvec::SmallVec;

use crate::arch::RegisterNumber;

type RegisterBytes = SmallVec<[u8; 16]>;

/// Raw register values for one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterCache
{
    values: Vec<Option<RegisterBytes>>,
}

impl RegisterCache
{
    /// An empty cache for `count` registers.
    #[must_use]
    pub fn new(count: usize) -> Self
    {
        Self {
            values: vec![None; count],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    /// Store a value. Register numbers past the end grow the cache.
    pub fn supply(&mut self, regno: RegisterNumber, bytes: &[u8])
    {
        if regno >= self.values.len() {
            self.values.resize(regno + 1, None);
        }
        self.values[regno] = Some(SmallVec::from_slice(bytes));
    }

    #[must_use]
    pub fn raw(&self, regno: RegisterNumber) -> Option<&[u8]>
    {
        self.values.get(regno)?.as_deref()
    }

    #[must_use]
    pub fn is_valid(&self, regno: RegisterNumber) -> bool
    {
        self.raw(regno).is_some()
    }

    pub fn invalidate(&mut self, regno: RegisterNumber)
    {
        if let Some(slot) = self.values.get_mut(regno) {
            *slot = None;
        }
    }

    pub fn invalidate_all(&mut self)
    {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Interpret up to eight bytes of a register as an unsigned integer.
    #[must_use]
    pub fn read_u64(&self, regno: RegisterNumber, endian: Endian) -> Option<u64>
    {
        let raw = self.raw(regno)?;
        let bytes = &raw[..raw.len().min(8)];
        let mut value = 0u64;
        match endian {
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | u64::from(b);
                }
            }
            Endian::Big => {
                for &b in bytes {
                    value = (value << 8) | u64::from(b);
                }
            }
        }
        Some(value)
    }

    /// Store an integer into a register of `size` bytes.
    pub fn write_u64(&mut self, regno: RegisterNumber, size: usize, endian: Endian, value: u64)
    {
        let mut bytes: RegisterBytes = SmallVec::from_elem(0, size);
        let width = size.min(8);
        for i in 0..width {
            let byte = (value >> (8 * i)) as u8;
            match endian {
                Endian::Little => bytes[i] = byte,
                Endian::Big => bytes[width - 1 - i] = byte,
            }
        }
        self.supply(regno, &bytes);
    }

    /// Numbers of all valid registers.
    pub fn valid_registers(&self) -> impl Iterator<Item = RegisterNumber> + '_
    {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_integer_views_follow_byte_order()
    {
        let mut cache = RegisterCache::new(4);
        cache.write_u64(1, 4, Endian::Big, 0x1234_5678);
        assert_eq!(cache.raw(1), Some(&[0x12, 0x34, 0x56, 0x78][..]));
        assert_eq!(cache.read_u64(1, Endian::Big), Some(0x1234_5678));

        cache.write_u64(2, 4, Endian::Little, 0x1234_5678);
        assert_eq!(cache.raw(2), Some(&[0x78, 0x56, 0x34, 0x12][..]));
        assert_eq!(cache.read_u64(2, Endian::Little), Some(0x1234_5678));
    }

    #[test]
    fn test_invalidate()
    {
        let mut cache = RegisterCache::new(2);
        cache.supply(0, &[1, 2, 3, 4]);
        assert!(cache.is_valid(0));
        cache.invalidate_all();
        assert!(!cache.is_valid(0));
        assert_eq!(cache.valid_registers().count(), 0);
    }
}
