//! # Neutrino `/proc` Backend
//!
//! The real [`ProcfsHost`]/[`ProcfsDevice`] pair: one open `/proc/<pid>/as`
//! file driven with `devctl`.
//!
//! ## Stop notification
//!
//! `DCMD_PROC_EVENT` arms a `SIGEV_SIGNAL_THREAD` event carrying `SIGUSR1`.
//! The host blocks `SIGUSR1` on creation and `wait_for_event` collects it
//! with `sigtimedwait`, polling a shared interrupt flag between waits so a
//! Ctrl-C handler can break the wait.

pub mod ffi;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::arch::{Architecture, RegisterSet};
use crate::error::{NtoError, Result};
use crate::procfs::device::{ProcfsDevice, ProcfsHost, WaitOutcome};
use crate::procfs::types::{parse_debuginfo, ProcessInfo, ProcfsBreak, ProcfsRun, ProcfsStatus};
use crate::signals::SIGUSR1;
use crate::types::{ProcessId, ThreadId};

/// CPU of the machine we are running on.
///
/// # Errors
///
/// `UnsupportedArchitecture` for CPUs without a register codec.
pub fn host_architecture() -> Result<Architecture>
{
    if cfg!(target_arch = "x86") || cfg!(target_arch = "x86_64") {
        Ok(Architecture::X86)
    } else if cfg!(target_arch = "arm") {
        Ok(Architecture::Arm)
    } else if cfg!(target_arch = "powerpc") {
        Ok(Architecture::Ppc)
    } else if cfg!(target_arch = "mips") {
        Ok(Architecture::Mips)
    } else {
        Err(NtoError::UnsupportedArchitecture(std::env::consts::ARCH.to_string()))
    }
}

fn check(ret: libc::c_int) -> io::Result<()>
{
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(ret))
    }
}

fn sigset_of(signo: i32) -> libc::sigset_t
{
    // SAFETY: sigemptyset initialises the set before sigaddset reads it.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo);
        set
    }
}

/// Opens `/proc` control files on this machine.
#[derive(Debug, Clone)]
pub struct QnxHost
{
    interrupted: Arc<AtomicBool>,
}

impl Default for QnxHost
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl QnxHost
{
    /// Block `SIGUSR1` so stop notifications queue for `sigtimedwait`.
    pub fn new() -> Self
    {
        Self::with_interrupt_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Use `flag` to break out of waits; set it from a Ctrl-C handler.
    pub fn with_interrupt_flag(flag: Arc<AtomicBool>) -> Self
    {
        let set = sigset_of(SIGUSR1);
        // SAFETY: `set` is a valid, initialised signal set.
        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if ret != 0 {
            debug!(errno = ret, "could not block SIGUSR1");
        }
        Self { interrupted: flag }
    }

    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool>
    {
        Arc::clone(&self.interrupted)
    }
}

impl ProcfsHost for QnxHost
{
    type Device = QnxDevice;

    fn open(&mut self, path: &Path, pid: ProcessId) -> io::Result<QnxDevice>
    {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(path = %path.display(), %pid, "opened control file");
        Ok(QnxDevice {
            file,
            pid,
            interrupted: Arc::clone(&self.interrupted),
        })
    }
}

/// One open `/proc/<pid>/as`. Closing it releases the process.
#[derive(Debug)]
pub struct QnxDevice
{
    file: File,
    pid: ProcessId,
    interrupted: Arc<AtomicBool>,
}

impl QnxDevice
{
    fn devctl_raw(&self, dcmd: libc::c_int, data: *mut libc::c_void, len: usize) -> io::Result<()>
    {
        // SAFETY: callers pass a buffer of at least `len` bytes.
        check(unsafe { ffi::devctl(self.file.as_raw_fd(), dcmd, data, len, std::ptr::null_mut()) })
    }

    fn devctl_buf(&self, dcmd: libc::c_int, buf: &mut [u8]) -> io::Result<()>
    {
        self.devctl_raw(dcmd, buf.as_mut_ptr().cast(), buf.len())
    }

    fn devctl_struct<T>(&self, dcmd: libc::c_int, value: &mut T) -> io::Result<()>
    {
        self.devctl_raw(dcmd, (value as *mut T).cast(), std::mem::size_of::<T>())
    }

    fn status_request(&self, dcmd: libc::c_int, tid: Option<ThreadId>) -> io::Result<ProcfsStatus>
    {
        let mut buf = [0u8; ffi::DEBUG_THREAD_SIZE];
        if let Some(tid) = tid {
            buf[4..8].copy_from_slice(&tid.raw().to_ne_bytes());
        }
        self.devctl_buf(dcmd, &mut buf)?;
        ProcfsStatus::parse(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    const fn regset_requests(set: RegisterSet) -> Option<(libc::c_int, libc::c_int)>
    {
        match set {
            RegisterSet::General => Some((ffi::DCMD_PROC_GETGREG, ffi::DCMD_PROC_SETGREG)),
            RegisterSet::Float => Some((ffi::DCMD_PROC_GETFPREG, ffi::DCMD_PROC_SETFPREG)),
            RegisterSet::Alternate => Some((ffi::DCMD_PROC_GETALTREG, ffi::DCMD_PROC_SETALTREG)),
            RegisterSet::System => None,
        }
    }
}

fn unsupported_set(set: RegisterSet) -> io::Error
{
    io::Error::new(io::ErrorKind::Unsupported, format!("no /proc request for {set} registers"))
}

impl ProcfsDevice for QnxDevice
{
    fn stop(&mut self) -> io::Result<ProcfsStatus>
    {
        self.status_request(ffi::DCMD_PROC_STOP, None)
    }

    fn status(&mut self) -> io::Result<ProcfsStatus>
    {
        self.status_request(ffi::DCMD_PROC_STATUS, None)
    }

    fn thread_status(&mut self, tid: ThreadId) -> io::Result<Option<ProcfsStatus>>
    {
        match self.status_request(ffi::DCMD_PROC_TIDSTATUS, Some(tid)) {
            Ok(status) => Ok(Some(status)),
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set_current_thread(&mut self, tid: ThreadId) -> io::Result<()>
    {
        let mut raw = tid.raw();
        self.devctl_struct(ffi::DCMD_PROC_CURTHREAD, &mut raw)
    }

    fn run(&mut self, params: &ProcfsRun) -> io::Result<()>
    {
        let split = |bits: u64| [bits as u32, (bits >> 32) as u32];
        let mut raw = ffi::DebugRun {
            flags: params.flags,
            tid: params.tid.map_or(0, ThreadId::raw),
            trace: split(params.trace.0),
            hold: split(params.hold.0),
            fault: split(params.fault.0),
            ip: params.ip.unwrap_or(0) as usize,
        };
        self.devctl_struct(ffi::DCMD_PROC_RUN, &mut raw)
    }

    fn arm_stop_event(&mut self) -> io::Result<()>
    {
        let mut event = ffi::SigEvent {
            notify: ffi::SIGEV_SIGNAL_THREAD,
            signo: SIGUSR1,
            value: 0,
            code: 0,
            priority: -1,
        };
        self.devctl_struct(ffi::DCMD_PROC_EVENT, &mut event)
    }

    fn read_regset(&mut self, set: RegisterSet) -> io::Result<Vec<u8>>
    {
        let (get, _) = Self::regset_requests(set).ok_or_else(|| unsupported_set(set))?;
        let mut buf = vec![0u8; ffi::REGSET_SIZE];
        let mut filled: libc::c_int = 0;
        // SAFETY: `buf` holds REGSET_SIZE writable bytes.
        check(unsafe {
            ffi::devctl(self.file.as_raw_fd(), get, buf.as_mut_ptr().cast(), buf.len(), &mut filled)
        })?;
        if let Ok(len) = usize::try_from(filled) {
            if len > 0 && len < buf.len() {
                buf.truncate(len);
            }
        }
        Ok(buf)
    }

    fn write_regset(&mut self, set: RegisterSet, data: &[u8]) -> io::Result<()>
    {
        let (_, put) = Self::regset_requests(set).ok_or_else(|| unsupported_set(set))?;
        let mut buf = data.to_vec();
        self.devctl_buf(put, &mut buf)
    }

    fn set_break(&mut self, brk: &ProcfsBreak) -> io::Result<()>
    {
        let mut raw = ffi::DebugBreak {
            break_type: brk.break_type as i16,
            size: brk.size,
            addr: brk.addr as usize,
        };
        self.devctl_struct(ffi::DCMD_PROC_BREAK, &mut raw)
    }

    fn info(&mut self) -> io::Result<ProcessInfo>
    {
        let mut buf = [0u8; ffi::DEBUG_PROCESS_SIZE];
        self.devctl_buf(ffi::DCMD_PROC_INFO, &mut buf)?;
        ProcessInfo::parse(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    fn exec_path(&mut self) -> io::Result<String>
    {
        let mut buf = vec![0u8; ffi::DEBUGINFO_SIZE];
        self.devctl_buf(ffi::DCMD_PROC_MAPDEBUG_BASE, &mut buf)?;
        let (_, path) = parse_debuginfo(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(path)
    }

    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> io::Result<usize>
    {
        self.file.read_at(buf, addr)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> io::Result<usize>
    {
        self.file.write_at(data, addr)
    }

    fn wait_for_event(&mut self) -> io::Result<WaitOutcome>
    {
        let set = sigset_of(SIGUSR1);
        let timeout = libc::timespec {
            tv_sec: 0,
            tv_nsec: 100_000_000,
        };
        loop {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Ok(WaitOutcome::Interrupted);
            }
            // SAFETY: `set` and `timeout` outlive the call; no siginfo is requested.
            let ret = unsafe { libc::sigtimedwait(&set, std::ptr::null_mut(), &timeout) };
            if ret == SIGUSR1 {
                trace!(pid = %self.pid, "stop notification");
                return Ok(WaitOutcome::Event);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    fn signal(&mut self, tid: Option<ThreadId>, signo: i32) -> io::Result<()>
    {
        let tid = tid.map_or(0, ThreadId::raw);
        // SAFETY: plain kernel call with integer arguments.
        let ret = unsafe { ffi::SignalKill(ffi::ND_LOCAL_NODE, self.pid.0, tid, signo, 0, 0) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn reap(&mut self) -> io::Result<i32>
    {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer.
        let ret = unsafe { libc::waitpid(self.pid.0, &mut status, libc::WNOHANG) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(status)
    }
}
