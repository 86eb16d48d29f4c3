//! Process, thread, and stop-event types.

use std::fmt;

use crate::signals::TargetSignal;

/// Process identifier (QNX `pid_t`)
///
/// Neutrino pids are signed 32-bit values; the wire protocol and `/proc`
/// structures carry them as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub i32);

impl From<i32> for ProcessId
{
    fn from(pid: i32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for i32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier within a process
///
/// Neutrino numbers threads from 1 within each process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub i32);

impl ThreadId
{
    pub const fn raw(self) -> i32
    {
        self.0
    }
}

impl From<i32> for ThreadId
{
    fn from(value: i32) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Why a wait on the target returned
///
/// ## State Transitions
///
/// - `resume` then a breakpoint/step/fault: `Stopped(signal)`
/// - `resume` then a normal exit: `Exited(code)`
/// - `resume` then death after an earlier fault/signal stop: `Signalled(signal)`
/// - remote targets also report shared-object activity as `Loaded`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus
{
    /// Stopped with the given signal (`Trap` for breakpoints and steps).
    Stopped(TargetSignal),
    /// Exited normally with `WEXITSTATUS`.
    Exited(i32),
    /// Terminated by a signal that was observed on an earlier stop.
    Signalled(TargetSignal),
    /// A shared object was loaded or unloaded; the process is stopped.
    Loaded,
}

impl fmt::Display for WaitStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            WaitStatus::Stopped(sig) => write!(f, "stopped ({sig})"),
            WaitStatus::Exited(code) => write!(f, "exited with code {code}"),
            WaitStatus::Signalled(sig) => write!(f, "terminated by {sig}"),
            WaitStatus::Loaded => f.write_str("shared library event"),
        }
    }
}

/// Kernel thread states (`STATE_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState
{
    Dead,
    Running,
    Ready,
    Stopped,
    Send,
    Receive,
    Reply,
    Stack,
    WaitThread,
    WaitPage,
    SigSuspend,
    SigWaitInfo,
    NanoSleep,
    Mutex,
    CondVar,
    Join,
    Intr,
    Sem,
    WaitCtx,
    NetSend,
    NetReply,
    Unknown(u8),
}

impl ThreadState
{
    const NAMES: [&'static str; 21] = [
        "DEAD",
        "RUNNING",
        "READY",
        "STOPPED",
        "SEND",
        "RECEIVE",
        "REPLY",
        "STACK",
        "WAITTHREAD",
        "WAITPAGE",
        "SIGSUSPEND",
        "SIGWAITINFO",
        "NANOSLEEP",
        "MUTEX",
        "CONDVAR",
        "JOIN",
        "INTR",
        "SEM",
        "WAITCTX",
        "NET_SEND",
        "NET_REPLY",
    ];

    #[must_use]
    pub const fn from_u8(value: u8) -> Self
    {
        match value {
            0 => Self::Dead,
            1 => Self::Running,
            2 => Self::Ready,
            3 => Self::Stopped,
            4 => Self::Send,
            5 => Self::Receive,
            6 => Self::Reply,
            7 => Self::Stack,
            8 => Self::WaitThread,
            9 => Self::WaitPage,
            10 => Self::SigSuspend,
            11 => Self::SigWaitInfo,
            12 => Self::NanoSleep,
            13 => Self::Mutex,
            14 => Self::CondVar,
            15 => Self::Join,
            16 => Self::Intr,
            17 => Self::Sem,
            18 => Self::WaitCtx,
            19 => Self::NetSend,
            20 => Self::NetReply,
            other => Self::Unknown(other),
        }
    }

    /// The kernel's name for the state, as shown in thread listings.
    #[must_use]
    pub fn name(self) -> &'static str
    {
        match self {
            Self::Unknown(_) => "UNKNOWN",
            other => Self::NAMES[other.index()],
        }
    }

    const fn index(self) -> usize
    {
        match self {
            Self::Dead => 0,
            Self::Running => 1,
            Self::Ready => 2,
            Self::Stopped => 3,
            Self::Send => 4,
            Self::Receive => 5,
            Self::Reply => 6,
            Self::Stack => 7,
            Self::WaitThread => 8,
            Self::WaitPage => 9,
            Self::SigSuspend => 10,
            Self::SigWaitInfo => 11,
            Self::NanoSleep => 12,
            Self::Mutex => 13,
            Self::CondVar => 14,
            Self::Join => 15,
            Self::Intr => 16,
            Self::Sem => 17,
            Self::WaitCtx => 18,
            Self::NetSend => 19,
            Self::NetReply => 20,
            Self::Unknown(v) => v as usize,
        }
    }
}

impl fmt::Display for ThreadState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// Snapshot of one thread, rebuilt on every status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo
{
    pub tid: ThreadId,
    pub state: ThreadState,
    /// `_DEBUG_FLAG_*` bits for the thread.
    pub flags: u32,
}

impl ThreadInfo
{
    /// One-line description, e.g. `"tid 2 REPLY"`.
    #[must_use]
    pub fn extra_info(&self) -> String
    {
        format!("tid {} {}", self.tid, self.state)
    }
}
