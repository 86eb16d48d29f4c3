//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed target address
///
/// QNX targets handled here are 32-bit, but the wire protocol carries 64-bit
/// addresses (`DStMsg_memrd`), so the value is stored as `u64` and narrowed to
/// the target's pointer width where the ABI requires it.
///
/// ## Example
///
/// ```rust
/// use ntodbg_core::types::Address;
///
/// let base = Address::from(0x0804_8000_u64);
/// assert_eq!((base + 0x100).value(), 0x0804_8100);
/// assert_eq!(Address::new(0x1_0000_0010).truncate(4), Address::new(0x10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    pub const ZERO: Self = Address(0);

    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset, returning `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Keep only the low `ptr_size` bytes, as the target's pointer would.
    #[must_use]
    pub const fn truncate(self, ptr_size: usize) -> Self
    {
        if ptr_size >= 8 {
            self
        } else {
            Address(self.0 & ((1u64 << (ptr_size * 8)) - 1))
        }
    }

    /// Apply a signed load bias with two's-complement wrap-around.
    #[must_use]
    pub const fn offset_by(self, bias: i64) -> Self
    {
        Address(self.0.wrapping_add(bias as u64))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<u32> for Address
{
    fn from(value: u32) -> Self
    {
        Address(u64::from(value))
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
