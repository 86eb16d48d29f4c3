//! SuperH (SH-4) register layout.
//!
//! `SH_CPU_REGISTERS` packs `sr`, `pc`, `gbr`, `mach`, `macl` and `pr` after
//! the sixteen GPRs. `vbr` is in the register file but not in the block. The
//! float block holds `fr0..fr15`, then `fpul` and `fpscr`.

use once_cell::sync::Lazy;

use super::{Architecture, Classification, RegisterCodec, RegisterInfo, RegisterNumber, RegisterSet};

pub const SH_PC_REGNUM: RegisterNumber = 16;
pub const SH_PR_REGNUM: RegisterNumber = 17;
pub const SH_VBR_REGNUM: RegisterNumber = 19;
pub const SH_SR_REGNUM: RegisterNumber = 22;
pub const SH_FPUL_REGNUM: RegisterNumber = 23;
pub const SH_FPSCR_REGNUM: RegisterNumber = 24;
pub const SH_FR0_REGNUM: RegisterNumber = 25;
pub const SH_FP_LAST_REGNUM: RegisterNumber = 40;

const GENERAL_AREA: usize = 88;
const FLOAT_AREA: usize = 136;

const GPR_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];
const FR_NAMES: [&str; 16] = [
    "fr0", "fr1", "fr2", "fr3", "fr4", "fr5", "fr6", "fr7", "fr8", "fr9", "fr10", "fr11", "fr12", "fr13", "fr14",
    "fr15",
];

static REGISTERS: Lazy<Vec<RegisterInfo>> = Lazy::new(|| {
    let mut regs = Vec::with_capacity(SH_FP_LAST_REGNUM + 1);
    for (i, name) in GPR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 4, RegisterSet::General, i * 4, 4));
    }
    regs.push(RegisterInfo::wire("pc", 4, RegisterSet::General, 68, 4));
    regs.push(RegisterInfo::wire("pr", 4, RegisterSet::General, 84, 4));
    regs.push(RegisterInfo::wire("gbr", 4, RegisterSet::General, 72, 4));
    regs.push(RegisterInfo::absent("vbr", 4));
    regs.push(RegisterInfo::wire("mach", 4, RegisterSet::General, 76, 4));
    regs.push(RegisterInfo::wire("macl", 4, RegisterSet::General, 80, 4));
    regs.push(RegisterInfo::wire("sr", 4, RegisterSet::General, 64, 4));
    regs.push(RegisterInfo::wire("fpul", 4, RegisterSet::Float, 128, 4));
    regs.push(RegisterInfo::wire("fpscr", 4, RegisterSet::Float, 132, 4));
    for (i, name) in FR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 4, RegisterSet::Float, i * 4, 4));
    }
    regs
});

/// Register codec for SH-4.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShCodec;

impl ShCodec
{
    #[must_use]
    pub fn new() -> Self
    {
        Self
    }
}

impl RegisterCodec for ShCodec
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Sh
    }

    fn registers(&self) -> &[RegisterInfo]
    {
        &REGISTERS
    }

    fn classify(&self, regno: Option<RegisterNumber>) -> Classification
    {
        match regno {
            None => Classification::End,
            Some(r) if r <= SH_SR_REGNUM => Classification::Set(RegisterSet::General),
            Some(r) if (SH_FPUL_REGNUM..=SH_FP_LAST_REGNUM).contains(&r) => Classification::Set(RegisterSet::Float),
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
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::arch::WireArea;

    #[test]
    fn test_vbr_has_no_wire_slot()
    {
        let codec = ShCodec::new();
        assert_eq!(codec.classify(Some(SH_VBR_REGNUM)), Classification::Set(RegisterSet::General));
        assert_eq!(codec.wire_area(SH_VBR_REGNUM, SH_VBR_REGNUM).unwrap(), WireArea::Skip {
            last: SH_VBR_REGNUM
        });
    }

    #[test]
    fn test_fr_bank_is_contiguous()
    {
        let codec = ShCodec::new();
        assert_eq!(
            codec.wire_area(SH_FR0_REGNUM, SH_FP_LAST_REGNUM).unwrap(),
            WireArea::Region {
                set: RegisterSet::Float,
                offset: 0,
                length: 64,
                last: SH_FP_LAST_REGNUM,
            }
        );
    }
}
