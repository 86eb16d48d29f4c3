//! PowerPC register layout.
//!
//! ## Blocks
//!
//! | block | layout | size |
//! |---|---|---|
//! | general | `gpr[32]`, `ctr`, `lr`, `msr`, `iar`, `cr`, `xer`, `ear`, `mq`, `vrsave` | 164 |
//! | float | `fpr[32]` (8 bytes each), pad, `fpscr` | 264 |
//! | alternate | `vmx[32]` (16 bytes each), `vscr` | 528 |
//!
//! GPRs and FPRs are addressed by index times width. The UISA special
//! registers sit at fixed struct offsets after the GPR bank, so they are
//! never contiguous with one another in register-number order.
//!
//! The number of general-purpose registers the target exposes is dynamic
//! ([`PpcCodec::with_gp_count`]); everything between the last exposed GPR and
//! `f0` is unsupported.

use super::{Architecture, Classification, RegisterCodec, RegisterInfo, RegisterNumber, RegisterSet};

pub const PPC_FP0_REGNUM: RegisterNumber = 32;
pub const PPC_PC_REGNUM: RegisterNumber = 64;
pub const PPC_MSR_REGNUM: RegisterNumber = 65;
pub const PPC_CR_REGNUM: RegisterNumber = 66;
pub const PPC_LR_REGNUM: RegisterNumber = 67;
pub const PPC_CTR_REGNUM: RegisterNumber = 68;
pub const PPC_XER_REGNUM: RegisterNumber = 69;
pub const PPC_FPSCR_REGNUM: RegisterNumber = 70;
pub const PPC_MQ_REGNUM: RegisterNumber = 71;
pub const PPC_VR0_REGNUM: RegisterNumber = 72;
pub const PPC_VSCR_REGNUM: RegisterNumber = 104;
pub const PPC_VRSAVE_REGNUM: RegisterNumber = 105;

const OFF_CTR: usize = 128;
const OFF_LR: usize = 132;
const OFF_MSR: usize = 136;
const OFF_IAR: usize = 140;
const OFF_CR: usize = 144;
const OFF_XER: usize = 148;
const OFF_MQ: usize = 156;
const OFF_VRSAVE: usize = 160;
const GENERAL_AREA: usize = 164;

const OFF_FPSCR: usize = 260;
const FLOAT_AREA: usize = 264;

// The VSCR word is the last of a 16-byte quantity.
const OFF_VSCR: usize = 524;
const ALT_AREA: usize = 528;

const GPR_NAMES: [&str; 32] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
    "r16", "r17", "r18", "r19", "r20", "r21", "r22", "r23", "r24", "r25", "r26", "r27", "r28", "r29", "r30",
    "r31",
];
const FPR_NAMES: [&str; 32] = [
    "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14", "f15",
    "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24", "f25", "f26", "f27", "f28", "f29", "f30",
    "f31",
];
const VR_NAMES: [&str; 32] = [
    "vr0", "vr1", "vr2", "vr3", "vr4", "vr5", "vr6", "vr7", "vr8", "vr9", "vr10", "vr11", "vr12", "vr13",
    "vr14", "vr15", "vr16", "vr17", "vr18", "vr19", "vr20", "vr21", "vr22", "vr23", "vr24", "vr25", "vr26",
    "vr27", "vr28", "vr29", "vr30", "vr31",
];

fn build_table(gp_count: usize) -> Vec<RegisterInfo>
{
    let mut regs = Vec::with_capacity(PPC_VRSAVE_REGNUM + 1);
    for (i, name) in GPR_NAMES.iter().enumerate() {
        if i < gp_count {
            regs.push(RegisterInfo::wire(name, 4, RegisterSet::General, i * 4, 4));
        } else {
            regs.push(RegisterInfo::absent(name, 4));
        }
    }
    for (i, name) in FPR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 8, RegisterSet::Float, i * 8, 8));
    }
    regs.push(RegisterInfo::wire("pc", 4, RegisterSet::General, OFF_IAR, 4));
    regs.push(RegisterInfo::wire("msr", 4, RegisterSet::General, OFF_MSR, 4));
    regs.push(RegisterInfo::wire("cr", 4, RegisterSet::General, OFF_CR, 4));
    regs.push(RegisterInfo::wire("lr", 4, RegisterSet::General, OFF_LR, 4));
    regs.push(RegisterInfo::wire("ctr", 4, RegisterSet::General, OFF_CTR, 4));
    regs.push(RegisterInfo::wire("xer", 4, RegisterSet::General, OFF_XER, 4));
    regs.push(RegisterInfo::wire("fpscr", 4, RegisterSet::Float, OFF_FPSCR, 4));
    regs.push(RegisterInfo::wire("mq", 4, RegisterSet::General, OFF_MQ, 4));
    for (i, name) in VR_NAMES.iter().enumerate() {
        regs.push(RegisterInfo::wire(name, 16, RegisterSet::Alternate, i * 16, 16));
    }
    regs.push(RegisterInfo::wire("vscr", 4, RegisterSet::Alternate, OFF_VSCR, 4));
    regs.push(RegisterInfo::wire("vrsave", 4, RegisterSet::General, OFF_VRSAVE, 4));
    regs
}

/// Register codec for 32-bit PowerPC.
#[derive(Debug, Clone)]
pub struct PpcCodec
{
    gp_count: usize,
    float_area_fallthrough: bool,
    table: Vec<RegisterInfo>,
}

impl Default for PpcCodec
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl PpcCodec
{
    /// All 32 GPRs exposed.
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_gp_count(32)
    }

    /// Expose only `r0..r{gp_count-1}` (clamped to 32).
    #[must_use]
    pub fn with_gp_count(gp_count: usize) -> Self
    {
        let gp_count = gp_count.min(32);
        Self {
            gp_count,
            float_area_fallthrough: false,
            table: build_table(gp_count),
        }
    }

    /// Report a zero-length float block, as older host tools did.
    ///
    /// Those tools fell through from the float case into the default case
    /// when sizing register blocks. Some agents were only ever exercised
    /// against that behavior, so it stays selectable.
    #[must_use]
    pub fn float_area_fallthrough(mut self, enabled: bool) -> Self
    {
        self.float_area_fallthrough = enabled;
        self
    }

    #[must_use]
    pub fn gp_count(&self) -> usize
    {
        self.gp_count
    }
}

impl RegisterCodec for PpcCodec
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Ppc
    }

    fn registers(&self) -> &[RegisterInfo]
    {
        &self.table
    }

    fn classify(&self, regno: Option<RegisterNumber>) -> Classification
    {
        let Some(regno) = regno else {
            return Classification::End;
        };
        let uisa_special = (PPC_PC_REGNUM..=PPC_XER_REGNUM).contains(&regno) || regno == PPC_MQ_REGNUM;
        if regno < self.gp_count || uisa_special || regno == PPC_VRSAVE_REGNUM {
            Classification::Set(RegisterSet::General)
        } else if (PPC_FP0_REGNUM..PPC_PC_REGNUM).contains(&regno) || regno == PPC_FPSCR_REGNUM {
            Classification::Set(RegisterSet::Float)
        } else if (PPC_VR0_REGNUM..=PPC_VSCR_REGNUM).contains(&regno) {
            Classification::Set(RegisterSet::Alternate)
        } else {
            Classification::Unsupported
        }
    }

    fn regset_area(&self, set: RegisterSet) -> usize
    {
        match set {
            RegisterSet::General => GENERAL_AREA,
            RegisterSet::Float if self.float_area_fallthrough => 0,
            RegisterSet::Float => FLOAT_AREA,
            RegisterSet::Alternate => ALT_AREA,
            RegisterSet::System => 0,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::arch::WireArea;

    #[test]
    fn test_special_registers_are_transferred_one_at_a_time()
    {
        let codec = PpcCodec::new();
        let area = codec.wire_area(PPC_PC_REGNUM, PPC_XER_REGNUM).unwrap();
        assert_eq!(
            area,
            WireArea::Region {
                set: RegisterSet::General,
                offset: OFF_IAR,
                length: 4,
                last: PPC_PC_REGNUM,
            }
        );
    }

    #[test]
    fn test_reduced_gp_count()
    {
        let codec = PpcCodec::with_gp_count(16);
        assert_eq!(codec.classify(Some(20)), Classification::Unsupported);
        let area = codec.wire_area(0, 31).unwrap();
        assert_eq!(
            area,
            WireArea::Region {
                set: RegisterSet::General,
                offset: 0,
                length: 64,
                last: 31,
            }
        );
    }

    #[test]
    fn test_float_area_fallthrough_is_opt_in()
    {
        assert_eq!(PpcCodec::new().regset_area(RegisterSet::Float), FLOAT_AREA);
        assert_eq!(
            PpcCodec::new()
                .float_area_fallthrough(true)
                .regset_area(RegisterSet::Float),
            0
        );
    }
}
