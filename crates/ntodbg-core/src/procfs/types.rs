//! `/proc` debug structures and constants.
//!
//! These mirror `<sys/debug.h>` and `<sys/procfs.h>`. Structures that come
//! back from `devctl` are parsed from raw bytes in the host's byte order,
//! since the kernel that fills them is the one we run on.

use std::fmt;

use ntodbg_protocol::codec::PayloadReader;
use ntodbg_protocol::Endian;

use crate::error::{NtoError, Result};
use crate::types::{ProcessId, ThreadId, ThreadState};

/// `_DEBUG_FLAG_*`: process and thread status bits.
pub mod flags
{
    /// Thread is not running.
    pub const STOPPED: u32 = 0x0000_0001;
    /// Stopped at a point of interest.
    pub const ISTOP: u32 = 0x0000_0002;
    pub const IPINVAL: u32 = 0x0000_0010;
    pub const ISSYS: u32 = 0x0000_0020;
    /// Stopped after a single step.
    pub const SSTEP: u32 = 0x0000_0040;
    pub const CURTID: u32 = 0x0000_0080;
    pub const TRACE_EXEC: u32 = 0x0000_0100;
    pub const TRACE_RD: u32 = 0x0000_0200;
    pub const TRACE_WR: u32 = 0x0000_0400;
    pub const TRACE_MODIFY: u32 = 0x0000_0800;
    /// Stopped on any breakpoint or watchpoint.
    pub const TRACE: u32 = TRACE_EXEC | TRACE_RD | TRACE_WR | TRACE_MODIFY;
    /// Run on last close.
    pub const RLC: u32 = 0x0001_0000;
    /// Kill on last close.
    pub const KLC: u32 = 0x0002_0000;
    pub const FORK: u32 = 0x0004_0000;
}

/// `_DEBUG_RUN_*`: `DCMD_PROC_RUN` options.
pub mod run
{
    pub const CLRSIG: u32 = 0x0000_0001;
    pub const CLRFLT: u32 = 0x0000_0002;
    pub const TRACE: u32 = 0x0000_0004;
    pub const HOLD: u32 = 0x0000_0008;
    pub const FAULT: u32 = 0x0000_0010;
    pub const VADDR: u32 = 0x0000_0020;
    pub const STEP: u32 = 0x0000_0040;
    pub const STEP_ALL: u32 = 0x0000_0080;
    pub const CURTID: u32 = 0x0000_0100;
    /// Deliver the stop event at the next point of interest.
    pub const ARM: u32 = 0x0000_0200;
}

/// Hardware fault numbers (`FLT*`).
pub mod fault
{
    pub const FLTILL: u32 = 1;
    pub const FLTPRIV: u32 = 2;
    pub const FLTBPT: u32 = 3;
    pub const FLTTRACE: u32 = 4;
    pub const FLTACCESS: u32 = 5;
    pub const FLTBOUNDS: u32 = 6;
    pub const FLTIOVF: u32 = 7;
    pub const FLTIZDIV: u32 = 8;
    pub const FLTFPE: u32 = 9;
    pub const FLTSTACK: u32 = 10;
    pub const FLTPAGE: u32 = 11;
}

/// `_DEBUG_WHY_*`: why a stopped process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopWhy
{
    /// `DCMD_PROC_STOP` (or the stop event after an interrupt).
    #[default]
    Requested,
    Signalled,
    Faulted,
    JobControl,
    Terminated,
    Child,
    Exec,
    Unknown(u16),
}

impl StopWhy
{
    #[must_use]
    pub const fn from_raw(value: u16) -> Self
    {
        match value {
            0 => Self::Requested,
            1 => Self::Signalled,
            2 => Self::Faulted,
            3 => Self::JobControl,
            4 => Self::Terminated,
            5 => Self::Child,
            6 => Self::Exec,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u16
    {
        match self {
            Self::Requested => 0,
            Self::Signalled => 1,
            Self::Faulted => 2,
            Self::JobControl => 3,
            Self::Terminated => 4,
            Self::Child => 5,
            Self::Exec => 6,
            Self::Unknown(other) => other,
        }
    }
}

/// A `sigset_t` covering signals `1..=64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet(pub u64);

impl SigSet
{
    fn bit(signo: i32) -> u64
    {
        match u32::try_from(signo) {
            Ok(n @ 1..=64) => 1u64 << (n - 1),
            _ => 0,
        }
    }

    pub fn add(&mut self, signo: i32)
    {
        self.0 |= Self::bit(signo);
    }

    pub fn remove(&mut self, signo: i32)
    {
        self.0 &= !Self::bit(signo);
    }

    #[must_use]
    pub fn contains(&self, signo: i32) -> bool
    {
        Self::bit(signo) != 0 && self.0 & Self::bit(signo) != 0
    }
}

impl FromIterator<i32> for SigSet
{
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self
    {
        let mut set = SigSet::default();
        iter.into_iter().for_each(|signo| set.add(signo));
        set
    }
}

/// A `fltset_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultSet(pub u64);

impl FaultSet
{
    /// Faults the debugger always wants to see.
    pub const DEBUGGER: FaultSet = FaultSet::of(&[
        fault::FLTBPT,
        fault::FLTTRACE,
        fault::FLTILL,
        fault::FLTPRIV,
        fault::FLTBOUNDS,
        fault::FLTIOVF,
        fault::FLTIZDIV,
        fault::FLTFPE,
        fault::FLTPAGE,
    ]);

    #[must_use]
    pub const fn of(faults: &[u32]) -> Self
    {
        let mut bits = 0u64;
        let mut i = 0;
        while i < faults.len() {
            bits |= 1u64 << (faults[i] - 1);
            i += 1;
        }
        FaultSet(bits)
    }

    #[must_use]
    pub const fn contains(&self, flt: u32) -> bool
    {
        flt >= 1 && flt <= 64 && self.0 & (1u64 << (flt - 1)) != 0
    }
}

/// Parameters for `DCMD_PROC_RUN` (`procfs_run`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcfsRun
{
    pub flags: u32,
    pub tid: Option<ThreadId>,
    pub trace: SigSet,
    pub hold: SigSet,
    pub fault: FaultSet,
    pub ip: Option<u64>,
}

/// Parameters for `DCMD_PROC_BREAK` (`procfs_break`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcfsBreak
{
    pub break_type: u16,
    pub size: i16,
    pub addr: u64,
}

/// Status of a process or thread (`procfs_status`, i.e. `debug_thread_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcfsStatus
{
    pub pid: i32,
    pub tid: i32,
    pub flags: u32,
    pub why: StopWhy,
    pub what: u16,
    pub ip: u64,
    pub sp: u64,
    /// Raw `STATE_*` value.
    pub state: u8,
    /// `info.si_signo`
    pub signo: i32,
    /// `info.si_code`
    pub code: i32,
}

/// Bytes of `debug_thread_t` the parser looks at.
pub const DEBUG_THREAD_MIN_SIZE: usize = 96;

fn malformed(what: &str, err: impl fmt::Display) -> NtoError
{
    NtoError::Internal(format!("malformed {what}: {err}"))
}

impl ProcfsStatus
{
    /// Parse a `debug_thread_t` filled in by the kernel.
    ///
    /// # Errors
    ///
    /// `Internal` when the buffer is shorter than the fixed header.
    pub fn parse(bytes: &[u8]) -> Result<Self>
    {
        Self::parse_with(bytes, Endian::native())
    }

    /// Parse a `debug_thread_t` stored in `endian` order, as in a core file's
    /// `.qnx_core_status` sections.
    ///
    /// # Errors
    ///
    /// `Internal` when the buffer is shorter than the fixed header.
    pub fn parse_with(bytes: &[u8], endian: Endian) -> Result<Self>
    {
        let mut r = PayloadReader::new(endian, bytes);
        let err = |e| malformed("debug_thread_t", e);
        let pid = r.i32().map_err(err)?;
        let tid = r.i32().map_err(err)?;
        let flags = r.u32().map_err(err)?;
        let why = StopWhy::from_raw(r.u16().map_err(err)?);
        let what = r.u16().map_err(err)?;
        let ip = r.u64().map_err(err)?;
        let sp = r.u64().map_err(err)?;
        // stkbase, tls, stksize, tid_flags, priority, real_priority, policy
        r.skip(8 + 8 + 4 + 4 + 3).map_err(err)?;
        let state = r.u8().map_err(err)?;
        // syscall, last_cpu, timeout, last_chid, sig_blocked, sig_pending
        r.skip(2 + 2 + 4 + 4 + 8 + 8).map_err(err)?;
        let signo = r.i32().map_err(err)?;
        let code = r.i32().map_err(err)?;
        Ok(Self {
            pid,
            tid,
            flags,
            why,
            what,
            ip,
            sp,
            state,
            signo,
            code,
        })
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool
    {
        self.flags & flags::STOPPED != 0
    }

    /// Stopped at a point of interest (the condition `wait` polls for).
    #[must_use]
    pub const fn at_point_of_interest(&self) -> bool
    {
        self.flags & flags::ISTOP != 0
    }

    #[must_use]
    pub const fn thread_state(&self) -> ThreadState
    {
        ThreadState::from_u8(self.state)
    }

    #[must_use]
    pub const fn thread_id(&self) -> ThreadId
    {
        ThreadId(self.tid)
    }

    #[must_use]
    pub const fn process_id(&self) -> ProcessId
    {
        ProcessId(self.pid)
    }
}

/// Process summary from `DCMD_PROC_INFO` (`procfs_info`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessInfo
{
    pub pid: i32,
    pub parent: i32,
    pub flags: u32,
    pub base_address: u64,
    pub initial_stack: u64,
    pub num_threads: u32,
}

impl ProcessInfo
{
    /// # Errors
    ///
    /// `Internal` when the buffer is too short.
    pub fn parse(bytes: &[u8]) -> Result<Self>
    {
        Self::parse_with(bytes, Endian::native())
    }

    /// Parse a `procfs_info` (`debug_process_t`) stored in `endian` order.
    ///
    /// Only the fields up to `num_threads` are read.
    ///
    /// # Errors
    ///
    /// `Internal` when the buffer ends before `num_threads`.
    pub fn parse_with(bytes: &[u8], endian: Endian) -> Result<Self>
    {
        let mut r = PayloadReader::new(endian, bytes);
        let err = |e| malformed("procfs_info", e);
        let pid = r.i32().map_err(err)?;
        let parent = r.i32().map_err(err)?;
        let flags = r.u32().map_err(err)?;
        // umask, child, sibling, pgrp, sid
        r.skip(20).map_err(err)?;
        let base_address = r.u64().map_err(err)?;
        let initial_stack = r.u64().map_err(err)?;
        // uid..sgid, sig_ignore, sig_queue, sig_pending, num_chancons, num_fdcons
        r.skip(24 + 24 + 8).map_err(err)?;
        let num_threads = r.u32().map_err(err)?;
        Ok(Self {
            pid,
            parent,
            flags,
            base_address,
            initial_stack,
            num_threads,
        })
    }
}

/// Parse `procfs_debuginfo` (`DCMD_PROC_MAPDEBUG_BASE`): a vaddr then a path.
///
/// # Errors
///
/// `Internal` when the buffer is shorter than the vaddr.
pub fn parse_debuginfo(bytes: &[u8]) -> Result<(u64, String)>
{
    let mut r = PayloadReader::new(Endian::native(), bytes);
    let vaddr = r.u64().map_err(|e| malformed("procfs_debuginfo", e))?;
    Ok((vaddr, r.cstr()))
}

#[cfg(test)]
mod tests
{
    use ntodbg_protocol::codec::PayloadWriter;

    use super::*;

    #[test]
    fn test_parse_debug_thread()
    {
        let mut w = PayloadWriter::new(Endian::native());
        w.i32(1234)
            .i32(2)
            .u32(flags::STOPPED | flags::ISTOP)
            .u16(StopWhy::Faulted.as_raw())
            .u16(fault::FLTBOUNDS as u16)
            .u64(0x0804_8010)
            .u64(0x7fff_0000)
            .pad(27)
            .u8(3)
            .pad(28)
            .i32(11)
            .i32(1);
        let status = ProcfsStatus::parse(&w.finish()).unwrap();
        assert_eq!(status.pid, 1234);
        assert_eq!(status.why, StopWhy::Faulted);
        assert_eq!(status.ip, 0x0804_8010);
        assert_eq!(status.thread_state(), ThreadState::Stopped);
        assert_eq!(status.signo, 11);
        assert!(status.at_point_of_interest());
    }

    #[test]
    fn test_short_status_is_rejected()
    {
        assert!(matches!(ProcfsStatus::parse(&[0; 12]), Err(NtoError::Internal(_))));
    }

    #[test]
    fn test_signal_and_fault_sets()
    {
        let mut set: SigSet = [1, 5, 64].into_iter().collect();
        assert!(set.contains(5));
        set.remove(5);
        assert!(!set.contains(5));
        assert!(set.contains(64));
        assert!(!set.contains(0));

        assert!(FaultSet::DEBUGGER.contains(fault::FLTBPT));
        assert!(FaultSet::DEBUGGER.contains(fault::FLTPAGE));
        assert!(!FaultSet::DEBUGGER.contains(fault::FLTACCESS));
    }

    #[test]
    fn test_parse_procfs_info()
    {
        let mut w = PayloadWriter::new(Endian::Big);
        w.i32(4100).i32(1).u32(0x0000_0200);
        w.pad(20);
        w.u64(0x0804_8000).u64(0x7fff_e000);
        w.pad(24 + 24 + 8);
        w.u32(3).pad(16);

        let info = ProcessInfo::parse_with(&w.finish(), Endian::Big).unwrap();
        assert_eq!(info.pid, 4100);
        assert_eq!(info.parent, 1);
        assert_eq!(info.flags, 0x200);
        assert_eq!(info.base_address, 0x0804_8000);
        assert_eq!(info.initial_stack, 0x7fff_e000);
        assert_eq!(info.num_threads, 3);

        assert!(ProcessInfo::parse_with(&[0u8; 40], Endian::Big).is_err());
    }

    #[test]
    fn test_parse_debuginfo()
    {
        let mut w = PayloadWriter::new(Endian::native());
        w.u64(0x0804_8000).cstr("/usr/bin/ls");
        assert_eq!(
            parse_debuginfo(&w.finish()).unwrap(),
            (0x0804_8000, "/usr/bin/ls".to_string())
        );
    }
}
