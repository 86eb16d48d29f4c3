//! # Remote target over pdebug
//!
//! [`RemoteTarget`] implements [`Target`] on top of a [`PdebugClient`]: every
//! operation becomes one or more `DStMsg_*` requests.
//!
//! ## Transfers
//!
//! - Registers move through the [`RegisterCodec::wire_area`] clamp-and-resume
//!   loop, one `regrd`/`regwr` per contiguous span. Stores read the span
//!   first so registers missing from the cache keep their target value.
//! - Memory moves in chunks of at most [`DS_DATA_MAX_SIZE`] bytes. A chunk
//!   that comes back short (or is refused) ends the transfer and the count
//!   so far is returned.
//!
//! ## Waiting
//!
//! `wait` blocks on the next `DShMsg_notify`. A read timeout just means
//! nothing happened yet; when the interrupt flag is set a `stop` request is
//! sent once and the resulting notification ends the wait.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ntodbg_protocol::codec::PayloadReader;
use ntodbg_protocol::messages::{brk, KillSubcmd, MemSubcmd, PidListSubcmd, RunMode, SelectSubcmd, StopSubcmd};
use ntodbg_protocol::{
    Endian, NotifyEvent, PdebugClient, ProtocolError, Request, Response, DS_DATA_MAX_SIZE, QNXNTO_NSIG,
};
use tracing::{debug, info, trace, warn};

use crate::arch::{Architecture, RegisterCodec, RegisterNumber, RegisterSet, WireArea};
use crate::breakpoints::{BreakRequest, BreakpointId, BreakpointKind, BreakpointStore};
use crate::error::{NtoError, Result};
use crate::regcache::RegisterCache;
use crate::signals::{SignalTable, TargetSignal, SIGKILL};
use crate::target::{MemoryAccess, StopEvent, Target};
use crate::types::{Address, ProcessId, ThreadId, ThreadInfo, ThreadState, WaitStatus};

/// Bytes before the first `tidinfo` in a `pidlist` reply (pid, num_tids, spare[6]).
const PIDLIST_HEADER: usize = 4 + 4 + 6 * 4;

fn is_target_error(err: &ProtocolError) -> bool
{
    matches!(err, ProtocolError::Target { .. })
}

/// A process debugged through a pdebug agent.
pub struct RemoteTarget<T>
{
    client: PdebugClient<T>,
    codec: Box<dyn RegisterCodec>,
    endian: Endian,
    protover: (u8, u8),
    pid: Option<ProcessId>,
    current_tid: Option<ThreadId>,
    signals: SignalTable,
    sent_handlesig: Option<[u8; QNXNTO_NSIG]>,
    breakpoints: BreakpointStore,
    regcache: RegisterCache,
    interrupted: Arc<AtomicBool>,
}

impl<T: Read + Write> RemoteTarget<T>
{
    /// Wrap a transport to an agent on an `arch` target.
    pub fn new(transport: T, arch: Architecture) -> Self
    {
        Self::with_codec(transport, arch.codec(), arch.default_endian())
    }

    pub fn with_codec(transport: T, codec: Box<dyn RegisterCodec>, endian: Endian) -> Self
    {
        let regcache = RegisterCache::new(codec.num_registers());
        Self {
            client: PdebugClient::new(transport, endian),
            codec,
            endian,
            protover: (0, 0),
            pid: None,
            current_tid: None,
            signals: SignalTable::default(),
            sent_handlesig: None,
            breakpoints: BreakpointStore::new(),
            regcache,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the session and negotiate the protocol version.
    ///
    /// Agents too old for `protover` are assumed to speak 0.0.
    ///
    /// # Errors
    ///
    /// Transport failures or a refused `connect`.
    pub fn connect(&mut self) -> Result<(u8, u8)>
    {
        self.client.connect()?;
        self.protover = match self.client.protocol_version() {
            Ok(version) => version,
            Err(err) if is_target_error(&err) => {
                debug!(error = %err, "agent predates protover");
                (0, 0)
            }
            Err(err) => return Err(err.into()),
        };
        info!(major = self.protover.0, minor = self.protover.1, "pdebug session open");
        Ok(self.protover)
    }

    /// Close the session politely.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub fn disconnect(&mut self) -> Result<()>
    {
        self.client.disconnect()?;
        Ok(())
    }

    #[must_use]
    pub fn protocol_version(&self) -> (u8, u8)
    {
        self.protover
    }

    #[must_use]
    pub fn pid(&self) -> Option<ProcessId>
    {
        self.pid
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointStore
    {
        &self.breakpoints
    }

    /// Set this flag (e.g. from a Ctrl-C handler) to stop a running process.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool>
    {
        Arc::clone(&self.interrupted)
    }

    pub fn client_mut(&mut self) -> &mut PdebugClient<T>
    {
        &mut self.client
    }

    /// Console output the agent forwarded since the last call.
    pub fn take_console(&mut self) -> Vec<u8>
    {
        self.client.take_console()
    }

    fn require_pid(&self) -> Result<ProcessId>
    {
        self.pid.ok_or(NtoError::NotAttached)
    }

    fn mourn(&mut self)
    {
        self.pid = None;
        self.current_tid = None;
        self.sent_handlesig = None;
        self.breakpoints.drain();
        self.regcache.invalidate_all();
    }

    /// Send the signal filter if it changed since it was last sent.
    fn sync_signal_table(&mut self) -> Result<()>
    {
        let table = self.signals.handlesig_table();
        if self.sent_handlesig == Some(table) {
            return Ok(());
        }
        match self.client.request(&Request::HandleSignals { table }) {
            Ok(_) => self.sent_handlesig = Some(table),
            Err(err) if is_target_error(&err) => warn!(error = %err, "agent rejected handlesig"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn select(&mut self, pid: ProcessId, tid: ThreadId) -> Result<()>
    {
        self.client.request(&Request::Select {
            subcmd: SelectSubcmd::Set,
            pid: pid.0,
            tid: tid.raw(),
        })?;
        Ok(())
    }

    /// Read `length` bytes at `offset` of a register block, in message-sized pieces.
    fn read_reg_area(&mut self, set: RegisterSet, offset: usize, length: usize) -> std::result::Result<Vec<u8>, ProtocolError>
    {
        let mut out = Vec::with_capacity(length);
        while out.len() < length {
            let chunk = (length - out.len()).min(DS_DATA_MAX_SIZE);
            let data = self.client.request_data(&Request::RegRead {
                set: set.subcmd(),
                offset: (offset + out.len()) as u16,
                size: chunk as u16,
            })?;
            if data.is_empty() {
                break;
            }
            out.extend_from_slice(&data[..data.len().min(chunk)]);
        }
        Ok(out)
    }

    fn write_reg_area(&mut self, set: RegisterSet, offset: usize, data: &[u8]) -> Result<()>
    {
        for (i, chunk) in data.chunks(DS_DATA_MAX_SIZE).enumerate() {
            self.client.request(&Request::RegWrite {
                set: set.subcmd(),
                offset: (offset + i * DS_DATA_MAX_SIZE) as u16,
                data: chunk.to_vec(),
            })?;
        }
        Ok(())
    }

    fn send_break(&mut self, req: &BreakRequest) -> Result<()>
    {
        self.client.request(&Request::Break {
            flags: req.break_type,
            addr: req.address.truncate(4).value() as u32,
            size: req.size,
        })?;
        Ok(())
    }

    fn stop_event(&mut self, pid: i32, tid: i32, event: &NotifyEvent) -> WaitStatus
    {
        match *event {
            NotifyEvent::PidUnload { status, faulted } => {
                if faulted {
                    WaitStatus::Signalled(TargetSignal::from_nto(status).unwrap_or(TargetSignal::Unknown(status)))
                } else {
                    WaitStatus::Exited(status)
                }
            }
            NotifyEvent::Brk { ip, dp, flags } => {
                let watch = flags & u32::from(brk::RWM) != 0;
                let hit = if watch {
                    self.breakpoints.record_watch_hit(Address::from(dp))
                } else {
                    self.breakpoints.record_hit(Address::from(ip))
                };
                debug!(pid, tid, ip, dp, flags, breakpoint = ?hit.map(|b| b.id), "breakpoint");
                WaitStatus::Stopped(TargetSignal::Trap)
            }
            NotifyEvent::Step { .. } => WaitStatus::Stopped(TargetSignal::Trap),
            NotifyEvent::SigEv { signo, .. } => {
                WaitStatus::Stopped(TargetSignal::from_nto(signo).unwrap_or(TargetSignal::Unknown(signo)))
            }
            NotifyEvent::Stopped => WaitStatus::Stopped(TargetSignal::Int),
            NotifyEvent::PidLoad { .. }
            | NotifyEvent::DllLoad { .. }
            | NotifyEvent::DllUnload { .. }
            | NotifyEvent::TidLoad
            | NotifyEvent::TidUnload => WaitStatus::Loaded,
        }
    }
}

impl<T: Read + Write> MemoryAccess for RemoteTarget<T>
{
    fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize>
    {
        let mut done = 0;
        while done < buf.len() {
            let chunk = (buf.len() - done).min(DS_DATA_MAX_SIZE);
            let request = Request::MemRead {
                space: MemSubcmd::Virtual,
                addr: addr.value() + done as u64,
                size: chunk as u16,
            };
            let data = match self.client.request_data(&request) {
                Ok(data) => data,
                Err(err) if is_target_error(&err) => {
                    debug!(%addr, done, error = %err, "memory read refused");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let got = data.len().min(chunk);
            buf[done..done + got].copy_from_slice(&data[..got]);
            done += got;
            if got < chunk {
                break;
            }
        }
        Ok(done)
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<usize>
    {
        let mut done = 0;
        for chunk in data.chunks(DS_DATA_MAX_SIZE) {
            let request = Request::MemWrite {
                space: MemSubcmd::Virtual,
                addr: addr.value() + done as u64,
                data: chunk.to_vec(),
            };
            let written = match self.client.request(&request) {
                Ok(Response::OkStatus(n)) => usize::try_from(n).unwrap_or(0).min(chunk.len()),
                Ok(_) => chunk.len(),
                Err(err) if is_target_error(&err) => {
                    debug!(%addr, done, error = %err, "memory write refused");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            done += written;
            if written < chunk.len() {
                break;
            }
        }
        Ok(done)
    }
}

impl<T: Read + Write> Target for RemoteTarget<T>
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
        let reply = self
            .client
            .request(&Request::Attach { pid: pid.0 })
            .map_err(|err| NtoError::AttachFailed {
                pid,
                reason: err.to_string(),
            })?;

        // The reply carries the pidload notification body: pid, tid, codeoff, dataoff, ostype, cputype.
        let mut tid = ThreadId(1);
        if let Response::OkData(data) = &reply {
            let mut r = PayloadReader::new(self.endian, data);
            if let (Ok(_), Ok(raw_tid)) = (r.i32(), r.i32()) {
                if raw_tid > 0 {
                    tid = ThreadId(raw_tid);
                }
            }
            let cputype = r.skip(4 + 4 + 2).and_then(|()| r.u16());
            if let Ok(cputype) = cputype {
                match Architecture::from_syspage_cpu(cputype) {
                    Some(arch) if arch != self.architecture() => {
                        warn!(%pid, target = %arch, debugger = %self.architecture(), "CPU type mismatch");
                    }
                    _ => {}
                }
            }
        }

        self.pid = Some(pid);
        self.current_tid = Some(tid);
        self.regcache.invalidate_all();
        self.sync_signal_table()?;
        info!(%pid, %tid, "attached through pdebug");
        Ok(tid)
    }

    fn detach(&mut self, signal: Option<TargetSignal>) -> Result<()>
    {
        let pid = self.require_pid()?;
        for bp in self.breakpoints.drain() {
            let req = BreakRequest::remove(bp.kind, bp.address);
            if let Err(err) = self.send_break(&req) {
                warn!(id = %bp.id, error = %err, "could not remove breakpoint on detach");
            }
        }
        if let Some(sig) = signal {
            self.client.request(&Request::Kill {
                subcmd: KillSubcmd::Pid,
                signo: sig.to_nto(),
            })?;
        }
        self.client.request(&Request::Detach { pid: pid.0 })?;
        self.mourn();
        info!(%pid, "detached");
        Ok(())
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.require_pid()?;
        self.client.request(&Request::Kill {
            subcmd: KillSubcmd::Pid,
            signo: SIGKILL,
        })?;
        self.mourn();
        info!(%pid, "killed");
        Ok(())
    }

    fn stop(&mut self) -> Result<()>
    {
        self.require_pid()?;
        self.client.request(&Request::Stop { subcmd: StopSubcmd::Pid })?;
        Ok(())
    }

    fn resume(&mut self, tid: Option<ThreadId>, step: bool, signal: Option<TargetSignal>) -> Result<()>
    {
        let pid = self.require_pid()?;
        if let Some(tid) = tid {
            self.select(pid, tid)?;
            self.current_tid = Some(tid);
        }
        self.sync_signal_table()?;
        if let Some(signo) = signal.map(TargetSignal::to_nto).filter(|&s| s != 0) {
            self.client.request(&Request::Kill {
                subcmd: KillSubcmd::Pid,
                signo,
            })?;
        }
        let mode = if step { RunMode::Count(1) } else { RunMode::Continue };
        self.client.request(&Request::Run(mode))?;
        self.regcache.invalidate_all();
        debug!(%pid, ?tid, step, ?signal, "resumed");
        Ok(())
    }

    fn wait(&mut self) -> Result<StopEvent>
    {
        let pid = self.require_pid()?;
        let mut stop_sent = false;
        let notification = loop {
            if !stop_sent && self.interrupted.swap(false, Ordering::SeqCst) {
                debug!(%pid, "interrupted, asking the agent to stop");
                self.client.request(&Request::Stop { subcmd: StopSubcmd::Pid })?;
                stop_sent = true;
            }
            match self.client.next_notification() {
                Ok(notification) => break notification,
                Err(ProtocolError::Timeout) => {
                    trace!("no notification yet");
                }
                Err(err) => return Err(err.into()),
            }
        };

        let status = self.stop_event(notification.pid, notification.tid, &notification.event);
        debug!(pid = notification.pid, tid = notification.tid, %status, "notification");
        let tid = match status {
            WaitStatus::Exited(_) | WaitStatus::Signalled(_) => {
                self.mourn();
                None
            }
            WaitStatus::Stopped(_) | WaitStatus::Loaded => {
                if notification.tid > 0 {
                    self.current_tid = Some(ThreadId(notification.tid));
                }
                self.regcache.invalidate_all();
                self.current_tid
            }
        };
        let event_pid = if notification.pid > 0 {
            ProcessId(notification.pid)
        } else {
            pid
        };
        Ok(StopEvent {
            pid: event_pid,
            tid,
            status,
        })
    }

    fn threads(&mut self) -> Result<Vec<ThreadInfo>>
    {
        let pid = self.require_pid()?;
        let mut threads: Vec<ThreadInfo> = Vec::new();
        let mut start = 1;
        loop {
            let request = Request::PidList {
                subcmd: PidListSubcmd::SpecificTid,
                pid: pid.0,
                tid: start,
            };
            let data = match self.client.request_data(&request) {
                Ok(data) => data,
                Err(err) if is_target_error(&err) => break,
                Err(err) => return Err(err.into()),
            };
            let mut r = PayloadReader::new(self.endian, &data);
            if r.skip(PIDLIST_HEADER).is_err() {
                break;
            }
            let mut highest = None;
            while let (Ok(tid), Ok(state), Ok(flags)) = (r.i16(), r.u8(), r.u8()) {
                if tid == 0 {
                    break;
                }
                let tid = i32::from(tid);
                highest = Some(highest.map_or(tid, |h: i32| h.max(tid)));
                let state = ThreadState::from_u8(state);
                if state != ThreadState::Dead && !threads.iter().any(|t| t.tid.raw() == tid) {
                    threads.push(ThreadInfo {
                        tid: ThreadId(tid),
                        state,
                        flags: u32::from(flags),
                    });
                }
            }
            match highest {
                Some(h) if h >= start => start = h + 1,
                _ => break,
            }
        }
        Ok(threads)
    }

    fn select_thread(&mut self, tid: ThreadId) -> Result<()>
    {
        let pid = self.require_pid()?;
        self.select(pid, tid)?;
        self.current_tid = Some(tid);
        self.regcache.invalidate_all();
        Ok(())
    }

    fn fetch_registers(&mut self) -> Result<()>
    {
        self.require_pid()?;
        let last = self.codec.num_registers().saturating_sub(1);
        let mut blocks: Vec<(RegisterSet, Vec<u8>)> = Vec::new();
        let mut failed: Vec<RegisterSet> = Vec::new();
        let mut regno = 0;
        while regno <= last {
            let (set, offset, length, covered) = match self.codec.wire_area(regno, last)? {
                WireArea::Region {
                    set,
                    offset,
                    length,
                    last,
                } => (set, offset, length, last),
                WireArea::Skip { last } => {
                    regno = last + 1;
                    continue;
                }
            };
            regno = covered + 1;
            if failed.contains(&set) {
                continue;
            }
            let data = match self.read_reg_area(set, offset, length) {
                Ok(data) => data,
                Err(err) if set != RegisterSet::General && is_target_error(&err) => {
                    debug!(%set, error = %err, "register set not available");
                    failed.push(set);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let area = self.codec.regset_area(set);
            let index = match blocks.iter().position(|(s, _)| *s == set) {
                Some(index) => index,
                None => {
                    blocks.push((set, vec![0; area]));
                    blocks.len() - 1
                }
            };
            let block = &mut blocks[index].1;
            let end = (offset + data.len()).min(block.len());
            if offset < end {
                block[offset..end].copy_from_slice(&data[..end - offset]);
            }
            trace!(%set, offset, length, covered, "fetched register span");
        }
        for (set, block) in &blocks {
            self.codec.unmarshal(&mut self.regcache, self.endian, *set, block);
        }
        Ok(())
    }

    fn store_registers(&mut self, first: RegisterNumber, last: RegisterNumber) -> Result<()>
    {
        self.require_pid()?;
        let mut regno = first;
        while regno <= last {
            let (set, offset, length, covered) = match self.codec.wire_area(regno, last)? {
                WireArea::Region {
                    set,
                    offset,
                    length,
                    last,
                } => (set, offset, length, last),
                WireArea::Skip { last } => {
                    regno = last + 1;
                    continue;
                }
            };
            if !self.codec.can_write(set) {
                debug!(%set, first = regno, last = covered, "register set is read-only");
                regno = covered + 1;
                continue;
            }
            let current = self.read_reg_area(set, offset, length)?;
            let mut block = vec![0u8; self.codec.regset_area(set)];
            let end = (offset + current.len()).min(block.len());
            if offset < end {
                block[offset..end].copy_from_slice(&current[..end - offset]);
            }
            if self.codec.marshal(&self.regcache, self.endian, regno, covered, &mut block)? {
                match block.get(offset..offset + length) {
                    Some(span) => self.write_reg_area(set, offset, span)?,
                    None => debug!(%set, offset, length, "register span outside its block, not sent"),
                }
            }
            regno = covered + 1;
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
        self.require_pid()?;
        self.send_break(&BreakRequest::insert(kind, addr, length))?;
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
        self.send_break(&BreakRequest::remove(info.kind, info.address))?;
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
