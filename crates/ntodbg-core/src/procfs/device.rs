//! The seam between the session state machine and the kernel.
//!
//! [`ProcfsHost`] opens control files and [`ProcfsDevice`] is one open
//! `/proc/<pid>/as`. The real implementation lives in
//! `crate::platform::qnx`; tests drive the session through a scripted fake.

use std::io;
use std::path::Path;

use crate::arch::RegisterSet;
use crate::procfs::types::{ProcessInfo, ProcfsBreak, ProcfsRun, ProcfsStatus};
use crate::types::{ProcessId, ThreadId};

/// Outcome of blocking for the stop notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome
{
    /// The stop event (or any other wake-up) arrived; poll the status again.
    Event,
    /// The user pressed Ctrl-C.
    Interrupted,
}

/// An open `/proc/<pid>/as` control file.
pub trait ProcfsDevice
{
    /// `DCMD_PROC_STOP`
    fn stop(&mut self) -> io::Result<ProcfsStatus>;

    /// `DCMD_PROC_STATUS` for the current thread.
    fn status(&mut self) -> io::Result<ProcfsStatus>;

    /// `DCMD_PROC_TIDSTATUS`: status of the first thread whose id is `>= tid`.
    ///
    /// `Ok(None)` once there are no more threads.
    fn thread_status(&mut self, tid: ThreadId) -> io::Result<Option<ProcfsStatus>>;

    /// `DCMD_PROC_CURTHREAD`
    fn set_current_thread(&mut self, tid: ThreadId) -> io::Result<()>;

    /// `DCMD_PROC_RUN`
    fn run(&mut self, run: &ProcfsRun) -> io::Result<()>;

    /// `DCMD_PROC_EVENT`: deliver a stop notification to the debugger.
    fn arm_stop_event(&mut self) -> io::Result<()>;

    /// `DCMD_PROC_GET{G,FP,ALT}REG`; the returned length is what the kernel filled in.
    fn read_regset(&mut self, set: RegisterSet) -> io::Result<Vec<u8>>;

    /// `DCMD_PROC_SET{G,FP,ALT}REG`
    fn write_regset(&mut self, set: RegisterSet, data: &[u8]) -> io::Result<()>;

    /// `DCMD_PROC_BREAK`
    fn set_break(&mut self, brk: &ProcfsBreak) -> io::Result<()>;

    /// `DCMD_PROC_INFO`
    fn info(&mut self) -> io::Result<ProcessInfo>;

    /// `DCMD_PROC_MAPDEBUG_BASE`: path of the executable.
    fn exec_path(&mut self) -> io::Result<String>;

    /// `lseek` + `read` on the control file.
    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// `lseek` + `write` on the control file.
    fn write_memory(&mut self, addr: u64, data: &[u8]) -> io::Result<usize>;

    /// Block until the stop notification arrives or the user interrupts.
    fn wait_for_event(&mut self) -> io::Result<WaitOutcome>;

    /// `SignalKill` to the process (`tid == None`) or one thread.
    fn signal(&mut self, tid: Option<ThreadId>, signo: i32) -> io::Result<()>;

    /// Collect the exit status of a terminated process (`waitpid`, `WNOHANG`).
    ///
    /// Returns the raw wait status, `0` when nothing could be reaped.
    fn reap(&mut self) -> io::Result<i32>;
}

/// Opens control files.
pub trait ProcfsHost
{
    type Device: ProcfsDevice;

    fn open(&mut self, path: &Path, pid: ProcessId) -> io::Result<Self::Device>;
}

/// A device that cannot exist; used on hosts without `/proc` debugging.
#[derive(Debug)]
pub enum NoDevice {}

impl ProcfsDevice for NoDevice
{
    fn stop(&mut self) -> io::Result<ProcfsStatus>
    {
        match *self {}
    }

    fn status(&mut self) -> io::Result<ProcfsStatus>
    {
        match *self {}
    }

    fn thread_status(&mut self, _tid: ThreadId) -> io::Result<Option<ProcfsStatus>>
    {
        match *self {}
    }

    fn set_current_thread(&mut self, _tid: ThreadId) -> io::Result<()>
    {
        match *self {}
    }

    fn run(&mut self, _run: &ProcfsRun) -> io::Result<()>
    {
        match *self {}
    }

    fn arm_stop_event(&mut self) -> io::Result<()>
    {
        match *self {}
    }

    fn read_regset(&mut self, _set: RegisterSet) -> io::Result<Vec<u8>>
    {
        match *self {}
    }

    fn write_regset(&mut self, _set: RegisterSet, _data: &[u8]) -> io::Result<()>
    {
        match *self {}
    }

    fn set_break(&mut self, _brk: &ProcfsBreak) -> io::Result<()>
    {
        match *self {}
    }

    fn info(&mut self) -> io::Result<ProcessInfo>
    {
        match *self {}
    }

    fn exec_path(&mut self) -> io::Result<String>
    {
        match *self {}
    }

    fn read_memory(&mut self, _addr: u64, _buf: &mut [u8]) -> io::Result<usize>
    {
        match *self {}
    }

    fn write_memory(&mut self, _addr: u64, _data: &[u8]) -> io::Result<usize>
    {
        match *self {}
    }

    fn wait_for_event(&mut self) -> io::Result<WaitOutcome>
    {
        match *self {}
    }

    fn signal(&mut self, _tid: Option<ThreadId>, _signo: i32) -> io::Result<()>
    {
        match *self {}
    }

    fn reap(&mut self) -> io::Result<i32>
    {
        match *self {}
    }
}

/// Host without `/proc` debugging support: every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedHost;

impl ProcfsHost for UnsupportedHost
{
    type Device = NoDevice;

    fn open(&mut self, _path: &Path, _pid: ProcessId) -> io::Result<NoDevice>
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "/proc debugging requires a QNX Neutrino host",
        ))
    }
}
