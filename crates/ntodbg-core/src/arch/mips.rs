//! MIPS register layout.
//!
//! Every wire slot is 8 bytes wide, even on 32-bit cores. The general block
//! holds the 32 GPRs followed by `sr`, `lo`, `hi`, `badvaddr`, `cause` and
//! `pc`, so a register's offset is simply `regno * 8`. The float block holds
//! `f0..f31` and `fcsr`; `fir` is not transferred.
//!
//! With 4-byte registers on a big-endian target the value is the low word of
//! the doubleword, i.e. the second four bytes of the slot.

use ntodbg_protocol::Endian;

use super::{
    Architecture, Classification, RegisterCodec, RegisterInfo, RegisterNumber, RegisterSet, WireSlot,
};

pub const MIPS_SR_REGNUM: RegisterNumber = 32;
pub const MIPS_PC_REGNUM: RegisterNumber = 37;
pub const MIPS_FP0_REGNUM: RegisterNumber = 38;
pub const MIPS_FCSR_REGNUM: RegisterNumber = 70;
pub const MIPS_FIR_REGNUM: RegisterNumber = 71;

const SLOT: usize = 8;
const GENERAL_AREA: usize = (MIPS_PC_REGNUM + 1) * SLOT;
const FLOAT_AREA: usize = 33 * SLOT;

const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "s0",
    "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "s8", "ra",
];
const SPECIAL_NAMES: [&str; 6] = ["sr", "lo", "hi", "badvaddr", "cause", "pc"];
const FPR_NAMES: [&str; 32] = [
    "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14", "f15",
    "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24", "f25", "f26", "f27", "f28", "f29", "f30",
    "f31",
];

fn build_table(register_size: usize) -> Vec<RegisterInfo>
{
    let mut regs = Vec::with_capacity(MIPS_FIR_REGNUM + 1);
    for (regno, name) in GPR_NAMES.iter().chain(SPECIAL_NAMES.iter()).enumerate() {
        regs.push(RegisterInfo::wire(name, register_size, RegisterSet::General, regno * SLOT, SLOT));
    }
    for (i, name) in FPR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, register_size, RegisterSet::Float, i * SLOT, SLOT));
    }
    regs.push(RegisterInfo::wire("fcsr", register_size, RegisterSet::Float, 32 * SLOT, SLOT));
    regs.push(RegisterInfo::absent("fir", register_size));
    regs
}

/// Register codec for MIPS32/MIPS64 cores.
#[derive(Debug, Clone)]
pub struct MipsCodec
{
    table: Vec<RegisterInfo>,
}

impl Default for MipsCodec
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl MipsCodec
{
    /// 32-bit registers.
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_register_size(4)
    }

    /// `register_size` is 4 or 8; anything else is treated as 8.
    #[must_use]
    pub fn with_register_size(register_size: usize) -> Self
    {
        let size = if register_size == 4 { 4 } else { 8 };
        Self {
            table: build_table(size),
        }
    }
}

impl RegisterCodec for MipsCodec
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Mips
    }

    fn registers(&self) -> &[RegisterInfo]
    {
        &self.table
    }

    fn classify(&self, regno: Option<RegisterNumber>) -> Classification
    {
        match regno {
            None => Classification::End,
            Some(r) if r <= MIPS_PC_REGNUM => Classification::Set(RegisterSet::General),
            Some(r) if (MIPS_FP0_REGNUM..=MIPS_FCSR_REGNUM).contains(&r) => Classification::Set(RegisterSet::Float),
            Some(_) => Classification::Unsupported,
        }
    }

    fn regset_area(&self, set: RegisterSet) -> usize
    {
        match set {
            RegisterSet::General => GENERAL_AREA,
            RegisterSet::Float => FLOAT_AREA,
            RegisterSet::Alternate | RegisterSet::System => 0,
        }
    }

    fn value_offset(&self, info: &RegisterInfo, slot: &WireSlot, endian: Endian) -> usize
    {
        if endian.is_big() && info.size == 4 && slot.wire_size == SLOT {
            4
        } else {
            0
        }
    }
}
