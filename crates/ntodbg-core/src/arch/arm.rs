//! ARM register layout.
//!
//! The general block is `ARM_CPU_REGISTERS`: sixteen 4-byte GPRs followed
//! directly by the status register at offset 64. Legacy FPA registers
//! (`F0..F7`, `FPS`) exist in the register file but are never sent by the
//! target. VFP state travels in the float block as 32 doublewords plus
//! `FPSCR`.

use once_cell::sync::Lazy;

use super::{Architecture, Classification, RegisterCodec, RegisterInfo, RegisterNumber, RegisterSet};

pub const ARM_SP_REGNUM: RegisterNumber = 13;
pub const ARM_LR_REGNUM: RegisterNumber = 14;
pub const ARM_PC_REGNUM: RegisterNumber = 15;
pub const ARM_F0_REGNUM: RegisterNumber = 16;
pub const ARM_FPS_REGNUM: RegisterNumber = 24;
pub const ARM_PS_REGNUM: RegisterNumber = 25;
pub const ARM_D0_REGNUM: RegisterNumber = 26;
pub const ARM_FPSCR_REGNUM: RegisterNumber = 58;

const GENERAL_AREA: usize = 17 * 4;
const VFP_AREA: usize = 32 * 8 + 16;

const GPR_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc",
];
const FPA_NAMES: [&str; 8] = ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"];
const VFP_NAMES: [&str; 32] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10", "d11", "d12", "d13", "d14", "d15",
    "d16", "d17", "d18", "d19", "d20", "d21", "d22", "d23", "d24", "d25", "d26", "d27", "d28", "d29", "d30",
    "d31",
];

static REGISTERS: Lazy<Vec<RegisterInfo>> = Lazy::new(|| {
    let mut regs = Vec::with_capacity(ARM_FPSCR_REGNUM + 1);
    for (i, name) in GPR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 4, RegisterSet::General, i * 4, 4));
    }
    for name in FPA_NAMES {
        regs.push(RegisterInfo::absent(name, 12));
    }
    regs.push(RegisterInfo::absent("fps", 4));
    regs.push(RegisterInfo::wire("cpsr", 4, RegisterSet::General, 16 * 4, 4));
    for (i, name) in VFP_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 8, RegisterSet::Float, i * 8, 8));
    }
    regs.push(RegisterInfo::wire("fpscr", 4, RegisterSet::Float, 32 * 8, 4));
    regs
});

/// Register codec for ARM (v5-v7, with optional VFP).
#[derive(Debug, Default, Clone, Copy)]
pub struct ArmCodec;

impl ArmCodec
{
    #[must_use]
    pub fn new() -> Self
    {
        Self
    }
}

impl RegisterCodec for ArmCodec
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Arm
    }

    fn registers(&self) -> &[RegisterInfo]
    {
        &REGISTERS
    }

    fn classify(&self, regno: Option<RegisterNumber>) -> Classification
    {
        let Some(regno) = regno else {
            return Classification::End;
        };
        if regno < ARM_F0_REGNUM || regno == ARM_PS_REGNUM {
            Classification::Set(RegisterSet::General)
        } else if (ARM_D0_REGNUM..=ARM_FPSCR_REGNUM).contains(&regno) {
            Classification::Set(RegisterSet::Float)
        } else {
            Classification::Unsupported
        }
    }

    fn regset_area(&self, set: RegisterSet) -> usize
    {
        match set {
            RegisterSet::General => GENERAL_AREA,
            RegisterSet::Float => VFP_AREA,
            RegisterSet::Alternate | RegisterSet::System => 0,
        }
    }
}
