//! x86 register layout.
//!
//! ## General block
//!
//! The target's `X86_CPU_REGISTERS` orders the integer registers differently
//! from the debugger's numbering. [`GDB_TO_NTO`] gives the target word index
//! for each debugger register; segment registers other than `cs`/`ss` are not
//! part of the block.
//!
//! ## Float block
//!
//! The float block is the 512-byte `FXSAVE` image. Each x87 register uses
//! only 10 of its 16 bytes; the rest is reserved and must not be written.
//! Control words are narrower on the wire than in the register cache.
//!
//! ## Writes
//!
//! Targets accept general-register writes. Writing the float block is
//! refused unless [`X86Codec::with_fp_write`] enables it.

use super::{Architecture, Classification, RegisterCodec, RegisterInfo, RegisterNumber, RegisterSet};

pub const I386_EIP_REGNUM: RegisterNumber = 8;
pub const I386_ST0_REGNUM: RegisterNumber = 16;
pub const I386_FCTRL_REGNUM: RegisterNumber = 24;
pub const I386_XMM0_REGNUM: RegisterNumber = 32;
pub const I386_MXCSR_REGNUM: RegisterNumber = 40;

/// Target word index of each general register, `None` when absent.
pub const GDB_TO_NTO: [Option<usize>; 13] = [
    Some(7),
    Some(6),
    Some(5),
    Some(4),
    Some(11),
    Some(2),
    Some(1),
    Some(0),
    Some(8),
    Some(10),
    Some(9),
    Some(12),
    None,
];

const GENERAL_AREA: usize = 13 * 4;
const FXSAVE_AREA: usize = 512;

const GENERAL_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "eflags", "cs", "ss", "ds", "es", "fs", "gs",
];
const ST_NAMES: [&str; 8] = ["st0", "st1", "st2", "st3", "st4", "st5", "st6", "st7"];
const XMM_NAMES: [&str; 8] = ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];

/// `(name, fxsave offset, wire width)` for the x87 control registers.
const X87_CONTROL: [(&str, usize, usize); 8] = [
    ("fctrl", 0, 2),
    ("fstat", 2, 2),
    ("ftag", 4, 1),
    ("fiseg", 12, 2),
    ("fioff", 8, 4),
    ("foseg", 20, 2),
    ("fooff", 16, 4),
    ("fop", 6, 2),
];

fn build_table() -> Vec<RegisterInfo>
{
    let mut regs = Vec::with_capacity(I386_MXCSR_REGNUM + 1);
    for (regno, name) in GENERAL_NAMES.iter().enumerate() {
        match GDB_TO_NTO.get(regno).copied().flatten() {
            Some(index) => regs.push(RegisterInfo::wire(name, 4, RegisterSet::General, index * 4, 4)),
            None => regs.push(RegisterInfo::absent(name, 4)),
        }
    }
    for (i, name) in ST_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 10, RegisterSet::Float, 32 + i * 16, 10));
    }
    for (name, offset, width) in X87_CONTROL {
        regs.push(RegisterInfo::wire(name, 4, RegisterSet::Float, offset, width));
    }
    for (i, name) in XMM_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 16, RegisterSet::Float, 160 + i * 16, 16));
    }
    regs.push(RegisterInfo::wire("mxcsr", 4, RegisterSet::Float, 24, 4));
    regs
}

/// Register codec for 32-bit x86.
#[derive(Debug, Clone)]
pub struct X86Codec
{
    fp_write_supported: bool,
    table: Vec<RegisterInfo>,
}

impl Default for X86Codec
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl X86Codec
{
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            fp_write_supported: false,
            table: build_table(),
        }
    }

    /// Allow marshalling the float block for agents known to accept it.
    #[must_use]
    pub fn with_fp_write(mut self, enabled: bool) -> Self
    {
        self.fp_write_supported = enabled;
        self
    }
}

impl RegisterCodec for X86Codec
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86
    }

    fn registers(&self) -> &[RegisterInfo]
    {
        &self.table
    }

    fn classify(&self, regno: Option<RegisterNumber>) -> Classification
    {
        match regno {
            None => Classification::End,
            Some(r) if r < I386_ST0_REGNUM => Classification::Set(RegisterSet::General),
            Some(r) if r <= I386_MXCSR_REGNUM => Classification::Set(RegisterSet::Float),
            Some(_) => Classification::Unsupported,
        }
    }

    fn regset_area(&self, set: RegisterSet) -> usize
    {
        match set {
            RegisterSet::General => GENERAL_AREA,
            RegisterSet::Float => FXSAVE_AREA,
            RegisterSet::Alternate | RegisterSet::System => 0,
        }
    }

    fn can_write(&self, set: RegisterSet) -> bool
    {
        set != RegisterSet::Float || self.fp_write_supported
    }
}

#[cfg(test)]
mod tests
{
    use ntodbg_protocol::Endian;

    use super::*;
    use crate::arch::WireArea;
    use crate::regcache::RegisterCache;

    #[test]
    fn test_general_registers_are_reordered()
    {
        let codec = X86Codec::new();
        // eax lives in word 7, ecx in word 6: never contiguous.
        assert_eq!(
            codec.wire_area(0, 1).unwrap(),
            WireArea::Region {
                set: RegisterSet::General,
                offset: 28,
                length: 4,
                last: 0,
            }
        );
        assert_eq!(codec.wire_area(12, 15).unwrap(), WireArea::Skip { last: 12 });
    }

    #[test]
    fn test_x87_register_leaves_reserved_bytes_alone()
    {
        let codec = X86Codec::new().with_fp_write(true);
        let mut cache = RegisterCache::new(codec.num_registers());
        cache.supply(I386_ST0_REGNUM, &[0x11; 10]);

        let mut block = vec![0xee; FXSAVE_AREA];
        assert!(codec
            .marshal(&cache, Endian::Little, I386_ST0_REGNUM, I386_ST0_REGNUM, &mut block)
            .unwrap());
        assert_eq!(&block[32..42], &[0x11; 10]);
        assert_eq!(&block[42..48], &[0xee; 6]);
    }

    #[test]
    fn test_narrow_control_words_are_widened()
    {
        let codec = X86Codec::new();
        let mut block = vec![0u8; FXSAVE_AREA];
        block[0] = 0x7f;
        block[1] = 0x03;
        block[2] = 0xff;
        let mut cache = RegisterCache::new(codec.num_registers());
        codec.unmarshal(&mut cache, Endian::Little, RegisterSet::Float, &block);
        assert_eq!(cache.read_u64(I386_FCTRL_REGNUM, Endian::Little), Some(0x037f));
        assert_eq!(cache.raw(I386_FCTRL_REGNUM).map(<[u8]>::len), Some(4));
    }

    #[test]
    fn test_float_write_refused_by_default()
    {
        let codec = X86Codec::new();
        let cache = RegisterCache::new(codec.num_registers());
        let mut block = vec![0u8; FXSAVE_AREA];
        assert!(!codec
            .marshal(&cache, Endian::Little, I386_ST0_REGNUM, I386_MXCSR_REGNUM, &mut block)
            .unwrap());
    }
}
