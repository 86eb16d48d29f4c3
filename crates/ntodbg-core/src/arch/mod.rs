//! # Architecture layer
//!
//! Register classification and wire-format register marshalling for the CPUs
//! Neutrino runs on.
//!
//! ## Register sets
//!
//! The wire protocol and `/proc` move registers in whole blocks, one block per
//! [`RegisterSet`]. Each architecture describes its blocks with a table of
//! [`RegisterInfo`] entries: the register's cache width and, when it exists
//! on the target, a [`WireSlot`] giving its block, byte offset, and wire
//! width. The generic code in this module does the rest.
//!
//! ## Clamp and resume
//!
//! A request for registers `first..=last` may cross block boundaries. A
//! single `DStMsg_regrd`/`DStMsg_regwr` can only address one contiguous span
//! of one block, so [`RegisterCodec::wire_area`] returns the longest
//! contiguous span starting at `first` together with the last register it
//! covers. Callers loop:
//!
//! ```text
//! let mut regno = first;
//! while regno <= last {
//!     match codec.wire_area(regno, last)? {
//!         WireArea::Region { set, offset, length, last: covered } => { /* transfer */ regno = covered + 1 }
//!         WireArea::Skip { last: covered } => regno = covered + 1,
//!     }
//! }
//! ```
//!
//! Registers that have no place on the wire yield [`WireArea::Skip`]. That is
//! not an error: it just means there is nothing to transfer for them.

pub mod arm;
pub mod mips;
pub mod ppc;
pub mod sh;
pub mod x86;

use std::fmt;
use std::str::FromStr;

use ntodbg_protocol::{Endian, RegSubcmd};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{NtoError, Result};
use crate::regcache::RegisterCache;

/// Index into an architecture's register file.
pub type RegisterNumber = usize;

/// A block of registers transferred as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSet
{
    General,
    Float,
    Alternate,
    System,
}

impl RegisterSet
{
    pub const ALL: [RegisterSet; 4] = [
        RegisterSet::General,
        RegisterSet::Float,
        RegisterSet::Alternate,
        RegisterSet::System,
    ];

    /// The `DSMSG_REG_*` subcommand addressing this block.
    #[must_use]
    pub const fn subcmd(self) -> RegSubcmd
    {
        match self {
            RegisterSet::General => RegSubcmd::General,
            RegisterSet::Float => RegSubcmd::Float,
            RegisterSet::Alternate => RegSubcmd::Alt,
            RegisterSet::System => RegSubcmd::System,
        }
    }
}

impl fmt::Display for RegisterSet
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            RegisterSet::General => "general",
            RegisterSet::Float => "float",
            RegisterSet::Alternate => "alternate",
            RegisterSet::System => "system",
        };
        f.write_str(name)
    }
}

/// Result of classifying a register number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification
{
    Set(RegisterSet),
    /// Outside every block this architecture transfers.
    Unsupported,
    /// The enumeration sentinel (no register).
    End,
}

/// Where a register lives in its block on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireSlot
{
    pub set: RegisterSet,
    /// Byte offset from the start of the block.
    pub offset: usize,
    /// Bytes occupied on the wire; may differ from the cache width.
    pub wire_size: usize,
}

/// One entry of an architecture's register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo
{
    pub name: &'static str,
    /// Width of the register in the register cache.
    pub size: usize,
    pub slot: Option<WireSlot>,
}

impl RegisterInfo
{
    pub(crate) const fn wire(name: &'static str, size: usize, set: RegisterSet, offset: usize, wire_size: usize) -> Self
    {
        Self {
            name,
            size,
            slot: Some(WireSlot {
                set,
                offset,
                wire_size,
            }),
        }
    }

    pub(crate) const fn absent(name: &'static str, size: usize) -> Self
    {
        Self { name, size, slot: None }
    }
}

/// Span of a register block addressed by one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireArea
{
    Region
    {
        set: RegisterSet,
        offset: usize,
        length: usize,
        /// Last register number covered; resume at `last + 1`.
        last: RegisterNumber,
    },
    /// Nothing to transfer for registers up to `last`.
    Skip
    {
        last: RegisterNumber,
    },
}

/// CPU families supported by Neutrino.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    X86,
    Ppc,
    Mips,
    Sh,
    Arm,
}

impl Architecture
{
    pub const ALL: [Architecture; 5] = [
        Architecture::X86,
        Architecture::Ppc,
        Architecture::Mips,
        Architecture::Sh,
        Architecture::Arm,
    ];

    /// Decode a syspage `SYSPAGE_*` CPU type (also used by `pidload`).
    #[must_use]
    pub const fn from_syspage_cpu(cputype: u16) -> Option<Self>
    {
        match cputype {
            0 => Some(Architecture::X86),
            1 => Some(Architecture::Ppc),
            2 => Some(Architecture::Mips),
            3 => Some(Architecture::Sh),
            4 => Some(Architecture::Arm),
            _ => None,
        }
    }

    #[must_use]
    pub const fn syspage_cpu(self) -> u16
    {
        match self {
            Architecture::X86 => 0,
            Architecture::Ppc => 1,
            Architecture::Mips => 2,
            Architecture::Sh => 3,
            Architecture::Arm => 4,
        }
    }

    /// Directory-style name (`x86`, `ppc`, `mips`, `sh`, `arm`).
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            Architecture::X86 => "x86",
            Architecture::Ppc => "ppc",
            Architecture::Mips => "mips",
            Architecture::Sh => "sh",
            Architecture::Arm => "arm",
        }
    }

    /// Byte order the CPU usually runs in on Neutrino.
    #[must_use]
    pub const fn default_endian(self) -> Endian
    {
        match self {
            Architecture::Ppc => Endian::Big,
            _ => Endian::Little,
        }
    }

    /// Size of a target pointer in bytes.
    #[must_use]
    pub const fn ptr_size(self) -> usize
    {
        4
    }

    /// The register codec with default options for this CPU.
    #[must_use]
    pub fn codec(self) -> Box<dyn RegisterCodec>
    {
        match self {
            Architecture::X86 => Box::new(x86::X86Codec::new()),
            Architecture::Ppc => Box::new(ppc::PpcCodec::new()),
            Architecture::Mips => Box::new(mips::MipsCodec::new()),
            Architecture::Sh => Box::new(sh::ShCodec::new()),
            Architecture::Arm => Box::new(arm::ArmCodec::new()),
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture
{
    type Err = NtoError;

    fn from_str(s: &str) -> Result<Self>
    {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i486" | "i586" => Ok(Architecture::X86),
            "ppc" | "powerpc" => Ok(Architecture::Ppc),
            "mips" => Ok(Architecture::Mips),
            "sh" | "sh4" => Ok(Architecture::Sh),
            "arm" => Ok(Architecture::Arm),
            other => Err(NtoError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

/// Per-architecture register classification and wire marshalling
///
/// Implementors provide the register table, the hand-written
/// [`classify`](RegisterCodec::classify) ranges, and block sizes. The
/// provided methods implement the clamp-and-resume span computation and the
/// byte copies in both directions.
pub trait RegisterCodec: Send + Sync
{
    fn architecture(&self) -> Architecture;

    /// The full register table, indexed by register number.
    fn registers(&self) -> &[RegisterInfo];

    /// Which block `regno` belongs to. `None` is the enumeration sentinel.
    fn classify(&self, regno: Option<RegisterNumber>) -> Classification;

    /// Size in bytes of a block on the wire (`0` if the CPU has none).
    fn regset_area(&self, set: RegisterSet) -> usize;

    /// Whether [`marshal`](RegisterCodec::marshal) may write this block.
    fn can_write(&self, _set: RegisterSet) -> bool
    {
        true
    }

    /// Where the register's value starts inside its wire slot.
    fn value_offset(&self, _info: &RegisterInfo, _slot: &WireSlot, _endian: Endian) -> usize
    {
        0
    }

    fn num_registers(&self) -> usize
    {
        self.registers().len()
    }

    fn register_name(&self, regno: RegisterNumber) -> Option<&'static str>
    {
        self.registers().get(regno).map(|r| r.name)
    }

    /// Look a register up by name.
    fn register_number(&self, name: &str) -> Option<RegisterNumber>
    {
        self.registers().iter().position(|r| r.name == name)
    }

    fn register_size(&self, regno: RegisterNumber) -> usize
    {
        self.registers().get(regno).map_or(0, |r| r.size)
    }

    /// The register's wire slot, if it has one in a block it classifies into.
    fn slot(&self, regno: RegisterNumber) -> Option<WireSlot>
    {
        let slot = self.registers().get(regno)?.slot?;
        match self.classify(Some(regno)) {
            Classification::Set(set) if set == slot.set => Some(slot),
            _ => None,
        }
    }

    /// Longest contiguous wire span starting at `first`, clamped to `last`.
    ///
    /// A span that does not fit inside its set's
    /// [`regset_area`](RegisterCodec::regset_area) is skipped.
    ///
    /// # Errors
    ///
    /// [`NtoError::InvalidRegisterRange`] when `first > last`.
    fn wire_area(&self, first: RegisterNumber, last: RegisterNumber) -> Result<WireArea>
    {
        if first > last {
            return Err(NtoError::InvalidRegisterRange { first, last });
        }

        let Classification::Set(set) = self.classify(Some(first)) else {
            return Ok(WireArea::Skip { last: first });
        };
        let Some(slot) = self.slot(first) else {
            return Ok(WireArea::Skip { last: first });
        };

        let offset = slot.offset;
        let mut end = slot.offset + slot.wire_size;
        let mut covered = first;
        let mut clamped = false;

        // Past the end of the table everything is unsupported.
        let scan_to = last.min(self.num_registers().saturating_sub(1));
        for regno in first + 1..=scan_to {
            match self.classify(Some(regno)) {
                Classification::Set(next_set) => match self.slot(regno) {
                    Some(next) if next_set == set && next.offset == end => {
                        end += next.wire_size;
                        covered = regno;
                    }
                    None if next_set == set => covered = regno,
                    _ => {
                        clamped = true;
                        break;
                    }
                },
                Classification::Unsupported | Classification::End => covered = regno,
            }
        }
        if !clamped {
            covered = last;
        }

        let area = self.regset_area(set);
        if end > area {
            trace!(first, covered, ?set, end, area, "span outside the register block");
            return Ok(WireArea::Skip { last: covered });
        }

        trace!(first, last, covered, ?set, offset, length = end - offset, "wire area");
        Ok(WireArea::Region {
            set,
            offset,
            length: end - offset,
            last: covered,
        })
    }

    /// Copy cached registers `first..=last` into a wire block.
    ///
    /// `block` is the whole block of `first`'s register set; registers in
    /// other sets and registers missing from the cache are left untouched.
    /// Returns `false` when `first` has no writable slot.
    ///
    /// # Errors
    ///
    /// `InvalidRegisterRange` for `first > last`, `BufferTooSmall` when
    /// `block` is shorter than the set's area.
    fn marshal(
        &self,
        cache: &RegisterCache,
        endian: Endian,
        first: RegisterNumber,
        last: RegisterNumber,
        block: &mut [u8],
    ) -> Result<bool>
    {
        if first > last {
            return Err(NtoError::InvalidRegisterRange { first, last });
        }
        let Classification::Set(set) = self.classify(Some(first)) else {
            return Ok(false);
        };
        if !self.can_write(set) {
            trace!(?set, "register set is read-only on this target");
            return Ok(false);
        }
        let needed = self.regset_area(set);
        if block.len() < needed {
            return Err(NtoError::BufferTooSmall {
                needed,
                actual: block.len(),
            });
        }

        let last = last.min(self.num_registers().saturating_sub(1));
        for regno in first..=last {
            let Some(slot) = self.slot(regno) else { continue };
            if slot.set != set {
                continue;
            }
            let Some(value) = cache.raw(regno) else { continue };
            let info = &self.registers()[regno];
            let skip = self.value_offset(info, &slot, endian);
            let count = value.len().min(slot.wire_size.saturating_sub(skip));
            let start = slot.offset + skip;
            if start + count > block.len() {
                continue;
            }
            block[start..start + count].copy_from_slice(&value[..count]);
        }
        Ok(true)
    }

    /// Supply every register of `set` found in `block` to the cache.
    ///
    /// Narrow wire fields are zero-extended to the cache width. Registers
    /// whose slot lies beyond the end of `block` are left as they were.
    fn unmarshal(&self, cache: &mut RegisterCache, endian: Endian, set: RegisterSet, block: &[u8])
    {
        for (regno, info) in self.registers().iter().enumerate() {
            let Some(slot) = self.slot(regno) else { continue };
            if slot.set != set || slot.offset + slot.wire_size > block.len() {
                continue;
            }
            let skip = self.value_offset(info, &slot, endian);
            let count = info.size.min(slot.wire_size.saturating_sub(skip));
            let start = slot.offset + skip;
            let mut value: SmallVec<[u8; 16]> = SmallVec::from_elem(0, info.size);
            value[..count].copy_from_slice(&block[start..start + count]);
            cache.supply(regno, &value);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_syspage_cpu_round_trip()
    {
        for arch in Architecture::ALL {
            assert_eq!(Architecture::from_syspage_cpu(arch.syspage_cpu()), Some(arch));
        }
        assert_eq!(Architecture::from_syspage_cpu(9), None);
    }

    #[test]
    fn test_architecture_parse()
    {
        assert_eq!("PowerPC".parse::<Architecture>().unwrap(), Architecture::Ppc);
        assert!(matches!(
            "sparc".parse::<Architecture>(),
            Err(NtoError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_subcmd_mapping()
    {
        assert_eq!(RegisterSet::General.subcmd(), RegSubcmd::General);
        assert_eq!(RegisterSet::Alternate.subcmd(), RegSubcmd::Alt);
    }
}
