//! # Target Trait
//!
//! The interface shared by the two ways of controlling a Neutrino process:
//!
//! - **native**: [`crate::procfs::ProcfsSession`], `devctl` on `/proc/<pid>/as`
//! - **remote**: [`crate::remote::RemoteTarget`], the pdebug wire protocol
//!
//! Both backends move registers in whole blocks through the same
//! [`RegisterCodec`], keep their own [`RegisterCache`], and report stops as
//! [`StopEvent`]s.
//!
//! ## Lifecycle
//!
//! 1. `attach(pid)`: the process is stopped and ready for inspection
//! 2. `fetch_registers`, `read_memory`, `insert_breakpoint`, ...
//! 3. `resume` then `wait` until the next stop
//! 4. `detach` (optionally with a last signal) or `kill`
//!
//! ## Thread Safety
//!
//! A target is owned by one thread. Nothing here is synchronized; wrap it in
//! a `Mutex` if several threads need it.

use ntodbg_protocol::Endian;

use crate::arch::{Architecture, RegisterCodec, RegisterNumber};
use crate::breakpoints::{BreakpointId, BreakpointKind};
use crate::error::{NtoError, Result};
use crate::regcache::RegisterCache;
use crate::signals::{SignalTable, TargetSignal};
use crate::types::{Address, ProcessId, ThreadId, ThreadInfo, WaitStatus};

/// A stop reported by [`Target::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopEvent
{
    pub pid: ProcessId,
    /// Thread that stopped; `None` once the process is gone.
    pub tid: Option<ThreadId>,
    pub status: WaitStatus,
}

/// Byte-level access to target memory.
///
/// Transfers may be short. Implementations report how many bytes actually
/// moved and never pretend a partial transfer succeeded.
pub trait MemoryAccess
{
    /// Read up to `buf.len()` bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Backend failures. A read the target refuses is a short count, not an error.
    fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` at `addr`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<usize>;

    /// Fill `buf` completely or fail.
    ///
    /// # Errors
    ///
    /// `Io(UnexpectedEof)` when the target returns fewer bytes.
    fn read_exact(&mut self, addr: Address, buf: &mut [u8]) -> Result<()>
    {
        let got = self.read_memory(addr, buf)?;
        if got < buf.len() {
            return Err(NtoError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read at {addr}: {got} of {} bytes", buf.len()),
            )));
        }
        Ok(())
    }

    /// Read a target pointer of `ptr_size` bytes (4 or 8).
    ///
    /// # Errors
    ///
    /// Same as [`MemoryAccess::read_exact`].
    fn read_pointer(&mut self, addr: Address, ptr_size: usize, endian: Endian) -> Result<Address>
    {
        let mut raw = [0u8; 8];
        let size = ptr_size.min(8);
        self.read_exact(addr, &mut raw[..size])?;
        let bytes = &raw[..size];
        let value = match endian {
            Endian::Little => bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            Endian::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        };
        Ok(Address::new(value))
    }
}

/// Process control for one Neutrino process.
pub trait Target: MemoryAccess
{
    fn architecture(&self) -> Architecture;

    fn codec(&self) -> &dyn RegisterCodec;

    /// Byte order of the target.
    fn endian(&self) -> Endian;

    /// Attach to `pid` and leave it stopped.
    ///
    /// Returns the thread the kernel reports as current.
    ///
    /// # Errors
    ///
    /// `AttachFailed` when the process cannot be opened or stopped.
    fn attach(&mut self, pid: ProcessId) -> Result<ThreadId>;

    /// Release the process, delivering `signal` first if given.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure delivering the signal.
    fn detach(&mut self, signal: Option<TargetSignal>) -> Result<()>;

    /// Kill the process and end the session.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure.
    fn kill(&mut self) -> Result<()>;

    /// Ask the process to stop. The stop is reported by the next `wait`.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure.
    fn stop(&mut self) -> Result<()>;

    /// Let the process run (or single-step `tid` when `step` is set).
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure.
    fn resume(&mut self, tid: Option<ThreadId>, step: bool, signal: Option<TargetSignal>) -> Result<()>;

    /// Block until the process stops or goes away.
    ///
    /// # Errors
    ///
    /// `Interrupted` when the user gave up waiting, or a backend failure.
    fn wait(&mut self) -> Result<StopEvent>;

    /// Live threads of the process.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure.
    fn threads(&mut self) -> Result<Vec<ThreadInfo>>;

    /// Make `tid` the thread registers are read from and written to.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a backend failure.
    fn select_thread(&mut self, tid: ThreadId) -> Result<()>;

    /// Refill the register cache from the target.
    ///
    /// # Errors
    ///
    /// `NotAttached`, or a failure fetching the general registers.
    fn fetch_registers(&mut self) -> Result<()>;

    /// Write cached registers `first..=last` back to the target.
    ///
    /// # Errors
    ///
    /// `InvalidRegisterRange`, `NotAttached`, or a backend failure.
    fn store_registers(&mut self, first: RegisterNumber, last: RegisterNumber) -> Result<()>;

    fn registers(&self) -> &RegisterCache;

    fn registers_mut(&mut self) -> &mut RegisterCache;

    /// # Errors
    ///
    /// `NotAttached`, or the kernel/agent refusing the breakpoint.
    fn insert_breakpoint(&mut self, addr: Address, kind: BreakpointKind, length: u32) -> Result<BreakpointId>;

    /// # Errors
    ///
    /// `NotAttached`, or the kernel/agent refusing the removal.
    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<()>;

    fn signals(&self) -> &SignalTable;

    fn signals_mut(&mut self) -> &mut SignalTable;

    /// Program counter from the register cache, if fetched.
    fn pc(&self) -> Option<Address>
    {
        let codec = self.codec();
        let name = match codec.architecture() {
            Architecture::X86 => "eip",
            Architecture::Arm | Architecture::Ppc | Architecture::Mips | Architecture::Sh => "pc",
        };
        let regno = codec.register_number(name)?;
        self.registers().read_u64(regno, self.endian()).map(Address::new)
    }
}
