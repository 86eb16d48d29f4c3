//! # Neutrino `devctl` FFI Declarations
//!
//! The `/proc` debug interface is driven through `devctl(2)` on the
//! process's `as` file. Neither `devctl` nor `SignalKill` is bound by the
//! `libc` crate, so they are declared here together with the request codes
//! and the structures the kernel reads.
//!
//! ## Request codes
//!
//! `DCMD_PROC_*` values are built the way `<devctl.h>` builds them:
//!
//! ```text
//! direction | sizeof(data) << 16 | _DCMD_PROC << 8 | subcommand
//! ```
//!
//! ## References
//!
//! - `<sys/procfs.h>`, `<sys/debug.h>`, `<devctl.h>`
//! - [devctl()](https://www.qnx.com/developers/docs/7.1/#com.qnx.doc.neutrino.lib_ref/topic/d/devctl.html)

#![allow(unused_doc_comments)]

use std::mem::size_of;

use libc::{c_int, c_void, pid_t, size_t};

const DEVDIR_TO: u32 = 0x8000_0000;
const DEVDIR_FROM: u32 = 0x4000_0000;
const DEVDIR_TOFROM: u32 = DEVDIR_TO | DEVDIR_FROM;

const DCMD_PROC_CLASS: u32 = 0x08;

const SUBCMD_AS: u32 = 0;
const SUBCMD_PROCFS: u32 = 32;

const fn dcmd(dir: u32, subcmd: u32, size: usize) -> c_int
{
    (dir | ((size as u32) << 16) | (DCMD_PROC_CLASS << 8) | subcmd) as c_int
}

/// `sizeof(debug_thread_t)`
pub const DEBUG_THREAD_SIZE: usize = 256;
/// `sizeof(debug_process_t)`
pub const DEBUG_PROCESS_SIZE: usize = 256;
/// Large enough for every `procfs_greg`/`procfs_fpreg`/`procfs_altreg` union.
pub const REGSET_SIZE: usize = 1024;
/// `procfs_debuginfo` followed by a full path.
pub const DEBUGINFO_SIZE: usize = size_of::<usize>() + 1024;

pub const DCMD_PROC_INFO: c_int = dcmd(DEVDIR_FROM, SUBCMD_AS + 1, DEBUG_PROCESS_SIZE);
pub const DCMD_PROC_MAPDEBUG_BASE: c_int = dcmd(DEVDIR_FROM, SUBCMD_AS + 4, DEBUGINFO_SIZE);
pub const DCMD_PROC_STOP: c_int = dcmd(DEVDIR_FROM, SUBCMD_PROCFS, DEBUG_THREAD_SIZE);
pub const DCMD_PROC_STATUS: c_int = dcmd(DEVDIR_FROM, SUBCMD_PROCFS + 2, DEBUG_THREAD_SIZE);
pub const DCMD_PROC_TIDSTATUS: c_int = dcmd(DEVDIR_TOFROM, SUBCMD_PROCFS + 2, DEBUG_THREAD_SIZE);
pub const DCMD_PROC_CURTHREAD: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 3, size_of::<i32>());
pub const DCMD_PROC_RUN: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 4, size_of::<DebugRun>());
pub const DCMD_PROC_GETGREG: c_int = dcmd(DEVDIR_FROM, SUBCMD_PROCFS + 5, REGSET_SIZE);
pub const DCMD_PROC_SETGREG: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 6, REGSET_SIZE);
pub const DCMD_PROC_GETFPREG: c_int = dcmd(DEVDIR_FROM, SUBCMD_PROCFS + 7, REGSET_SIZE);
pub const DCMD_PROC_SETFPREG: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 8, REGSET_SIZE);
pub const DCMD_PROC_EVENT: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 9, size_of::<SigEvent>());
pub const DCMD_PROC_BREAK: c_int = dcmd(DEVDIR_TOFROM, SUBCMD_PROCFS + 14, size_of::<DebugBreak>());
pub const DCMD_PROC_GETALTREG: c_int = dcmd(DEVDIR_FROM, SUBCMD_PROCFS + 16, REGSET_SIZE);
pub const DCMD_PROC_SETALTREG: c_int = dcmd(DEVDIR_TO, SUBCMD_PROCFS + 17, REGSET_SIZE);

/// Local node descriptor for `SignalKill`.
pub const ND_LOCAL_NODE: u32 = 0;
/// Deliver the stop notification as a signal to the arming thread.
pub const SIGEV_SIGNAL_THREAD: c_int = 3;

/// `debug_run_t`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugRun
{
    pub flags: u32,
    pub tid: i32,
    pub trace: [u32; 2],
    pub hold: [u32; 2],
    pub fault: [u32; 2],
    pub ip: usize,
}

/// `debug_break_t`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugBreak
{
    pub break_type: i16,
    pub size: i16,
    pub addr: usize,
}

/// `struct sigevent` as used for `SIGEV_SIGNAL_THREAD`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SigEvent
{
    pub notify: c_int,
    pub signo: c_int,
    pub value: usize,
    pub code: i16,
    pub priority: i16,
}

extern "C" {
    /// Send a device-control request.
    ///
    /// Returns `EOK` (0) or an errno value; `errno` itself is not set.
    ///
    /// ## Safety
    ///
    /// `data` must point to at least `nbytes` bytes laid out as the request
    /// expects, writable for `DEVDIR_FROM` requests.
    pub fn devctl(fd: c_int, dcmd: c_int, data: *mut c_void, nbytes: size_t, info: *mut c_int) -> c_int;

    /// Deliver a signal to a process (`tid == 0`) or one of its threads.
    ///
    /// Returns `-1` and sets `errno` on failure.
    pub fn SignalKill(nd: u32, pid: pid_t, tid: c_int, signo: c_int, code: c_int, value: c_int) -> c_int;
}
