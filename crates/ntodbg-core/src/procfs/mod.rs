//! # Native process control through `/proc`
//!
//! [`ProcfsSession`] debugs one process on the machine it runs on, using
//! `devctl` requests on `/proc/<pid>/as`.
//!
//! ## State machine
//!
//! ```text
//! Unattached -> Attaching -> Stopped <-> Running -> Exited | Signalled | Detached
//! ```
//!
//! - `attach` opens the control file, stops the process, arms the stop
//!   notification, and sends `SIGCONT` if job control had already stopped it
//! - `resume` builds a `procfs_run` with the debugger's fault set and the
//!   traced signals, then issues `DCMD_PROC_RUN`
//! - `wait` polls `DCMD_PROC_STATUS`, blocking for the stop notification
//!   between polls, and classifies the stop (see [`classify_stop`])
//!
//! ## Failures
//!
//! A failed devctl aborts the command that issued it and is reported as
//! [`NtoError::Devctl`]; the session stays usable. Missing float or
//! alternate register sets are expected on some cores and are skipped.
//!
//! ## Interrupts
//!
//! The first Ctrl-C during `wait` asks the process to stop. A second one
//! runs the interrupt handler, which may abandon the process (it is killed
//! and `wait` returns [`NtoError::Interrupted`]).

pub mod device;
pub mod types;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ntodbg_protocol::Endian;
use tracing::{debug, info, warn};

use crate::arch::{Architecture, RegisterCodec, RegisterNumber, RegisterSet};
use crate::breakpoints::{BreakRequest, BreakpointId, BreakpointKind, BreakpointStore};
use crate::error::{NtoError, Result};
use crate::regcache::RegisterCache;
use crate::signals::{SignalTable, TargetSignal, SIGCONT, SIGKILL, SIGTRAP};
use crate::target::{MemoryAccess, StopEvent, Target};
use crate::types::{Address, ProcessId, ThreadId, ThreadInfo, ThreadState, WaitStatus};
use device::{ProcfsDevice, ProcfsHost, WaitOutcome};
use types::{flags, run, FaultSet, ProcessInfo, ProcfsBreak, ProcfsRun, ProcfsStatus, StopWhy};

/// Where control files are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcfsConfig
{
    /// Mount point of the process manager's `/proc`.
    pub root: PathBuf,
    /// Debug a process on another node through `/net/<node>`.
    pub node: Option<String>,
}

impl Default for ProcfsConfig
{
    fn default() -> Self
    {
        Self {
            root: PathBuf::from("/proc"),
            node: None,
        }
    }
}

impl ProcfsConfig
{
    /// `<root>/<pid>/as`, or `/net/<node><root>/<pid>/as` for a remote node.
    #[must_use]
    pub fn control_path(&self, pid: ProcessId) -> PathBuf
    {
        let root = match &self.node {
            Some(node) => {
                let relative = self.root.strip_prefix("/").unwrap_or(&self.root);
                PathBuf::from("/net").join(node).join(relative)
            }
            None => self.root.clone(),
        };
        root.join(pid.to_string()).join("as")
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState
{
    Unattached,
    Attaching,
    Stopped,
    Running,
    Exited(i32),
    Signalled(TargetSignal),
    Detached,
}

/// Answer to a repeated interrupt during `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction
{
    KeepWaiting,
    /// Kill the process and stop debugging it.
    Abandon,
}

type InterruptHandler = Box<dyn FnMut() -> InterruptAction + Send>;

/// Decide what a stop means.
///
/// `exit_signo` is the signal remembered from an earlier fault stop; a
/// process that terminates while one is remembered is reported as killed by
/// it. `reap` is only called for terminations and returns the raw wait
/// status.
pub fn classify_stop(
    status: &ProcfsStatus,
    exit_signo: &mut Option<TargetSignal>,
    reap: impl FnOnce() -> i32,
) -> WaitStatus
{
    let signal = || TargetSignal::from_nto(status.signo).unwrap_or(TargetSignal::Unknown(status.signo));

    if status.flags & flags::SSTEP != 0 || status.flags & flags::TRACE != 0 {
        return WaitStatus::Stopped(TargetSignal::Trap);
    }
    match status.why {
        StopWhy::Signalled => {
            *exit_signo = None;
            WaitStatus::Stopped(signal())
        }
        StopWhy::Faulted if status.signo == SIGTRAP => {
            *exit_signo = None;
            WaitStatus::Stopped(TargetSignal::Trap)
        }
        StopWhy::Faulted => {
            let sig = signal();
            *exit_signo = Some(sig);
            WaitStatus::Stopped(sig)
        }
        StopWhy::Terminated => {
            let raw = reap();
            match exit_signo.take() {
                Some(sig) => WaitStatus::Signalled(sig),
                None => WaitStatus::Exited((raw >> 8) & 0xff),
            }
        }
        StopWhy::Requested => {
            *exit_signo = None;
            WaitStatus::Stopped(TargetSignal::Int)
        }
        StopWhy::JobControl | StopWhy::Child | StopWhy::Exec | StopWhy::Unknown(_) => {
            WaitStatus::Stopped(TargetSignal::from_nto(status.signo).unwrap_or(TargetSignal::Trap))
        }
    }
}

const fn regset_requests(set: RegisterSet) -> (&'static str, &'static str)
{
    match set {
        RegisterSet::General => ("DCMD_PROC_GETGREG", "DCMD_PROC_SETGREG"),
        RegisterSet::Float => ("DCMD_PROC_GETFPREG", "DCMD_PROC_SETFPREG"),
        RegisterSet::Alternate => ("DCMD_PROC_GETALTREG", "DCMD_PROC_SETALTREG"),
        RegisterSet::System => ("DCMD_PROC_GETREGSET", "DCMD_PROC_SETREGSET"),
    }
}

fn devctl(request: &'static str) -> impl FnOnce(std::io::Error) -> NtoError
{
    move |source| NtoError::Devctl { request, source }
}

/// One process debugged through `/proc`.
pub struct ProcfsSession<H: ProcfsHost>
{
    host: H,
    config: ProcfsConfig,
    codec: Box<dyn RegisterCodec>,
    endian: Endian,
    state: SessionState,
    device: Option<H::Device>,
    pid: Option<ProcessId>,
    current_tid: Option<ThreadId>,
    exit_signo: Option<TargetSignal>,
    interrupts: u32,
    signals: SignalTable,
    breakpoints: BreakpointStore,
    regcache: RegisterCache,
    on_interrupt: InterruptHandler,
}

impl<H: ProcfsHost> ProcfsSession<H>
{
    /// A session for a CPU of type `arch` running in its usual byte order.
    pub fn new(host: H, arch: Architecture, config: ProcfsConfig) -> Self
    {
        Self::with_codec(host, arch.codec(), arch.default_endian(), config)
    }

    pub fn with_codec(host: H, codec: Box<dyn RegisterCodec>, endian: Endian, config: ProcfsConfig) -> Self
    {
        let regcache = RegisterCache::new(codec.num_registers());
        Self {
            host,
            config,
            codec,
            endian,
            state: SessionState::Unattached,
            device: None,
            pid: None,
            current_tid: None,
            exit_signo: None,
            interrupts: 0,
            signals: SignalTable::default(),
            breakpoints: BreakpointStore::new(),
            regcache,
            on_interrupt: Box::new(|| InterruptAction::KeepWaiting),
        }
    }

    /// Called on the second Ctrl-C during a wait.
    pub fn set_interrupt_handler<F>(&mut self, handler: F)
    where
        F: FnMut() -> InterruptAction + Send + 'static,
    {
        self.on_interrupt = Box::new(handler);
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.state
    }

    #[must_use]
    pub fn pid(&self) -> Option<ProcessId>
    {
        self.pid
    }

    #[must_use]
    pub fn current_thread(&self) -> Option<ThreadId>
    {
        self.current_tid
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointStore
    {
        &self.breakpoints
    }

    #[must_use]
    pub fn config(&self) -> &ProcfsConfig
    {
        &self.config
    }

    fn device(&mut self) -> Result<&mut H::Device>
    {
        self.device.as_mut().ok_or(NtoError::NotAttached)
    }

    fn attach_failed(&mut self, pid: ProcessId, reason: String) -> NtoError
    {
        self.state = SessionState::Unattached;
        NtoError::AttachFailed { pid, reason }
    }

    /// Drop the control file and forget the process.
    fn mourn(&mut self)
    {
        self.device = None;
        self.pid = None;
        self.current_tid = None;
        self.exit_signo = None;
        self.interrupts = 0;
        self.breakpoints.drain();
        self.regcache.invalidate_all();
    }

    /// `DCMD_PROC_INFO` for the attached process.
    ///
    /// # Errors
    ///
    /// `NotAttached` or `Devctl`.
    pub fn process_info(&mut self) -> Result<ProcessInfo>
    {
        self.device()?.info().map_err(devctl("DCMD_PROC_INFO"))
    }

    /// Path of the attached process's executable.
    ///
    /// # Errors
    ///
    /// `NotAttached` or `Devctl`.
    pub fn exec_file(&mut self) -> Result<String>
    {
        self.device()?
            .exec_path()
            .map_err(devctl("DCMD_PROC_MAPDEBUG_BASE"))
    }

    fn handle_interrupt(&mut self) -> Result<()>
    {
        self.interrupts += 1;
        if self.interrupts == 1 {
            debug!(pid = ?self.pid, "interrupted, stopping the process");
            if let Err(err) = self.device()?.stop() {
                warn!(error = %err, "DCMD_PROC_STOP after interrupt failed");
            }
            return Ok(());
        }
        match (self.on_interrupt)() {
            InterruptAction::KeepWaiting => Ok(()),
            InterruptAction::Abandon => {
                info!(pid = ?self.pid, "giving up on the process");
                if let Err(err) = self.device()?.signal(None, SIGKILL) {
                    warn!(error = %err, "could not kill abandoned process");
                }
                self.mourn();
                self.state = SessionState::Unattached;
                Err(NtoError::Interrupted)
            }
        }
    }
}

impl<H: ProcfsHost> MemoryAccess for ProcfsSession<H>
{
    fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize>
    {
        match self.device()?.read_memory(addr.value(), buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                debug!(%addr, len = buf.len(), error = %err, "memory read failed");
                Ok(0)
            }
        }
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<usize>
    {
        match self.device()?.write_memory(addr.value(), data) {
            Ok(n) => Ok(n),
            Err(err) => {
                debug!(%addr, len = data.len(), error = %err, "memory write failed");
                Ok(0)
            }
        }
    }
}

impl<H: ProcfsHost> Target for ProcfsSession<H>
{
    fn architecture(&self) -> Architecture
    {
        self.codec.architecture()
    }

    fn codec(&self) -> &dyn RegisterCodec
    {
        self.codec.as_ref()
    }

    fn endian(&self) -> Endian
    {
        self.endian
    }

    fn attach(&mut self, pid: ProcessId) -> Result<ThreadId>
    {
        if self.device.is_some() {
            return Err(NtoError::AttachFailed {
                pid,
                reason: "already debugging a process".to_string(),
            });
        }
        self.state = SessionState::Attaching;
        let path = self.config.control_path(pid);
        debug!(%pid, path = %path.display(), "attaching");

        let mut device = match self.host.open(&path, pid) {
            Ok(device) => device,
            Err(err) => {
                let reason = format!("couldn't open {}: {err}", path.display());
                return Err(self.attach_failed(pid, reason));
            }
        };
        let stopped = match device.stop() {
            Ok(status) => status,
            Err(err) => return Err(self.attach_failed(pid, format!("couldn't stop process: {err}"))),
        };
        if let Err(err) = device.arm_stop_event() {
            warn!(%pid, error = %err, "could not arm the stop notification");
        }
        let mut tid = stopped.thread_id();
        match device.status() {
            Ok(status) => {
                tid = status.thread_id();
                if status.is_stopped() {
                    debug!(%pid, "process was already stopped, sending SIGCONT");
                    if let Err(err) = device.signal(None, SIGCONT) {
                        warn!(%pid, error = %err, "SIGCONT failed");
                    }
                }
            }
            Err(err) => debug!(%pid, error = %err, "status after attach unavailable"),
        }

        self.device = Some(device);
        self.pid = Some(pid);
        self.current_tid = Some(tid);
        self.exit_signo = None;
        self.interrupts = 0;
        self.regcache.invalidate_all();
        self.state = SessionState::Stopped;
        info!(%pid, %tid, "attached");
        Ok(tid)
    }

    fn detach(&mut self, signal: Option<TargetSignal>) -> Result<()>
    {
        let pid = self.pid.ok_or(NtoError::NotAttached)?;
        let installed = self.breakpoints.drain();
        let device = self.device()?;
        for bp in installed {
            let req = BreakRequest::remove(bp.kind, bp.address);
            if let Err(err) = device.set_break(&procfs_break(&req)) {
                warn!(id = %bp.id, error = %err, "could not remove breakpoint on detach");
            }
        }
        if let Some(sig) = signal {
            device.signal(None, sig.to_nto()).map_err(devctl("SignalKill"))?;
        }
        self.mourn();
        self.state = SessionState::Detached;
        info!(%pid, "detached");
        Ok(())
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.pid.ok_or(NtoError::NotAttached)?;
        self.device()?
            .signal(None, SIGKILL)
            .map_err(devctl("SignalKill"))?;
        self.mourn();
        self.state = SessionState::Signalled(TargetSignal::Kill);
        info!(%pid, "killed");
        Ok(())
    }

    fn stop(&mut self) -> Result<()>
    {
        self.device()?.stop().map_err(devctl("DCMD_PROC_STOP"))?;
        Ok(())
    }

    fn resume(&mut self, tid: Option<ThreadId>, step: bool, signal: Option<TargetSignal>) -> Result<()>
    {
        let mut params = ProcfsRun {
            flags: run::FAULT | run::TRACE | run::ARM,
            fault: FaultSet::DEBUGGER,
            trace: self.signals.traced().collect(),
            ..ProcfsRun::default()
        };
        if step {
            params.flags |= run::STEP;
        }

        let device = self.device.as_mut().ok_or(NtoError::NotAttached)?;
        if let Some(tid) = tid {
            device
                .set_current_thread(tid)
                .map_err(devctl("DCMD_PROC_CURTHREAD"))?;
            self.current_tid = Some(tid);
        }

        match signal.map(TargetSignal::to_nto).filter(|&signo| signo != 0) {
            Some(signo) => {
                let status = device.status().map_err(devctl("DCMD_PROC_STATUS"))?;
                let stopped_on_signal = matches!(status.why, StopWhy::Signalled | StopWhy::Faulted);
                if stopped_on_signal && status.signo == signo {
                    // Let the process handle (or die of) it without stopping again.
                    params.trace.remove(signo);
                } else {
                    device.signal(None, signo).map_err(devctl("SignalKill"))?;
                    params.flags |= run::CLRFLT | run::CLRSIG;
                }
            }
            None => params.flags |= run::CLRSIG | run::CLRFLT,
        }

        device.run(&params).map_err(devctl("DCMD_PROC_RUN"))?;
        self.regcache.invalidate_all();
        self.state = SessionState::Running;
        debug!(pid = ?self.pid, ?tid, step, ?signal, "resumed");
        Ok(())
    }

    fn wait(&mut self) -> Result<StopEvent>
    {
        let pid = self.pid.ok_or(NtoError::NotAttached)?;
        let status = loop {
            let status = self.device()?.status().map_err(devctl("DCMD_PROC_STATUS"))?;
            if status.at_point_of_interest() {
                break status;
            }
            match self.device()?.wait_for_event()? {
                WaitOutcome::Event => {}
                WaitOutcome::Interrupted => self.handle_interrupt()?,
            }
        };
        self.interrupts = 0;

        let device = self.device.as_mut().ok_or(NtoError::NotAttached)?;
        let result = classify_stop(&status, &mut self.exit_signo, || match device.reap() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(%pid, error = %err, "no exit status to reap");
                0
            }
        });
        debug!(%pid, tid = status.tid, why = ?status.why, flags = status.flags, %result, "stopped");

        let tid = match result {
            WaitStatus::Exited(code) => {
                self.mourn();
                self.state = SessionState::Exited(code);
                None
            }
            WaitStatus::Signalled(sig) => {
                self.mourn();
                self.state = SessionState::Signalled(sig);
                None
            }
            WaitStatus::Stopped(_) | WaitStatus::Loaded => {
                let tid = status.thread_id();
                self.current_tid = Some(tid);
                self.regcache.invalidate_all();
                self.state = SessionState::Stopped;
                Some(tid)
            }
        };
        Ok(StopEvent {
            pid,
            tid,
            status: result,
        })
    }

    fn threads(&mut self) -> Result<Vec<ThreadInfo>>
    {
        let device = self.device()?;
        let mut threads = Vec::new();
        let mut tid = 1;
        loop {
            match device.thread_status(ThreadId(tid)) {
                Ok(Some(status)) => {
                    let state = status.thread_state();
                    if state != ThreadState::Dead {
                        threads.push(ThreadInfo {
                            tid: status.thread_id(),
                            state,
                            flags: status.flags,
                        });
                    }
                    tid = status.tid.max(tid) + 1;
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(tid, error = %err, "DCMD_PROC_TIDSTATUS ended the scan");
                    break;
                }
            }
        }
        Ok(threads)
    }

    fn select_thread(&mut self, tid: ThreadId) -> Result<()>
    {
        self.device()?
            .set_current_thread(tid)
            .map_err(devctl("DCMD_PROC_CURTHREAD"))?;
        self.current_tid = Some(tid);
        self.regcache.invalidate_all();
        Ok(())
    }

    fn fetch_registers(&mut self) -> Result<()>
    {
        let device = self.device.as_mut().ok_or(NtoError::NotAttached)?;
        if let Some(tid) = self.current_tid {
            device
                .set_current_thread(tid)
                .map_err(devctl("DCMD_PROC_CURTHREAD"))?;
        }
        for set in [RegisterSet::General, RegisterSet::Float, RegisterSet::Alternate] {
            if self.codec.regset_area(set) == 0 {
                continue;
            }
            match device.read_regset(set) {
                Ok(block) => self.codec.unmarshal(&mut self.regcache, self.endian, set, &block),
                Err(source) if set == RegisterSet::General => {
                    return Err(NtoError::Devctl {
                        request: regset_requests(set).0,
                        source,
                    });
                }
                Err(err) => debug!(%set, error = %err, "register set not available"),
            }
        }
        Ok(())
    }

    fn store_registers(&mut self, first: RegisterNumber, last: RegisterNumber) -> Result<()>
    {
        if first > last {
            return Err(NtoError::InvalidRegisterRange { first, last });
        }
        let device = self.device.as_mut().ok_or(NtoError::NotAttached)?;
        let last = last.min(self.codec.num_registers().saturating_sub(1));
        for set in [RegisterSet::General, RegisterSet::Float, RegisterSet::Alternate] {
            let Some(start) = (first..=last).find(|&r| self.codec.slot(r).is_some_and(|s| s.set == set)) else {
                continue;
            };
            let (get, put) = regset_requests(set);
            let mut block = match device.read_regset(set) {
                Ok(block) => block,
                Err(source) if set == RegisterSet::General => return Err(NtoError::Devctl { request: get, source }),
                Err(err) => {
                    debug!(%set, error = %err, "register set not available, not storing");
                    continue;
                }
            };
            let area = self.codec.regset_area(set);
            if block.len() < area {
                block.resize(area, 0);
            }
            if !self.codec.marshal(&self.regcache, self.endian, start, last, &mut block)? {
                debug!(%set, first = start, last, "register set is not writable");
                continue;
            }
            device
                .write_regset(set, &block)
                .map_err(|source| NtoError::Devctl { request: put, source })?;
        }
        Ok(())
    }

    fn registers(&self) -> &RegisterCache
    {
        &self.regcache
    }

    fn registers_mut(&mut self) -> &mut RegisterCache
    {
        &mut self.regcache
    }

    fn insert_breakpoint(&mut self, addr: Address, kind: BreakpointKind, length: u32) -> Result<BreakpointId>
    {
        let req = BreakRequest::insert(kind, addr, length);
        self.device()?
            .set_break(&procfs_break(&req))
            .map_err(devctl("DCMD_PROC_BREAK"))?;
        let id = self.breakpoints.insert(addr, kind, length);
        debug!(%id, %addr, ?kind, "breakpoint inserted");
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<()>
    {
        let info = self
            .breakpoints
            .get(id)
            .cloned()
            .ok_or_else(|| NtoError::Internal(format!("no breakpoint {id}")))?;
        let req = BreakRequest::remove(info.kind, info.address);
        self.device()?
            .set_break(&procfs_break(&req))
            .map_err(devctl("DCMD_PROC_BREAK"))?;
        self.breakpoints.remove(id);
        Ok(())
    }

    fn signals(&self) -> &SignalTable
    {
        &self.signals
    }

    fn signals_mut(&mut self) -> &mut SignalTable
    {
        &mut self.signals
    }
}

fn procfs_break(req: &BreakRequest) -> ProcfsBreak
{
    ProcfsBreak {
        break_type: u16::from(req.break_type),
        size: i16::try_from(req.size).unwrap_or(i16::MAX),
        addr: req.address.value(),
    }
}

/// Host handle used for native debugging on this machine.
#[cfg(target_os = "nto")]
pub type NativeHost = crate::platform::qnx::QnxHost;
/// Host handle used for native debugging on this machine.
#[cfg(not(target_os = "nto"))]
pub type NativeHost = device::UnsupportedHost;

/// A session debugging processes on this machine.
///
/// Setting `interrupted` (from a Ctrl-C handler) breaks a pending `wait`.
///
/// # Errors
///
/// `UnsupportedPlatform` anywhere but on a Neutrino host.
pub fn native_session(config: ProcfsConfig, interrupted: Arc<AtomicBool>) -> Result<ProcfsSession<NativeHost>>
{
    #[cfg(target_os = "nto")]
    {
        let arch = crate::platform::qnx::host_architecture()?;
        let host = crate::platform::qnx::QnxHost::with_interrupt_flag(interrupted);
        Ok(ProcfsSession::new(host, arch, config))
    }
    #[cfg(not(target_os = "nto"))]
    {
        let _ = (config, interrupted);
        Err(NtoError::UnsupportedPlatform)
    }
}
