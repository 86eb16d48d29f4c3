//! # Signals
//!
//! Neutrino signal numbering, a host-neutral [`TargetSignal`], and the
//! per-signal stop/print/pass dispositions the debugger applies.
//!
//! ## Dispositions and `handlesig`
//!
//! The remote agent filters signals itself using a 57-entry table sent with
//! `DStMsg_handlesig`. Entry `signo - 1` is `0` only when the signal neither
//! stops nor prints and is passed to the program; every other combination
//! needs the debugger's attention and is `1`.

use std::fmt;

use ntodbg_protocol::QNXNTO_NSIG;

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGILL: i32 = 4;
pub const SIGTRAP: i32 = 5;
pub const SIGABRT: i32 = 6;
pub const SIGEMT: i32 = 7;
pub const SIGFPE: i32 = 8;
pub const SIGKILL: i32 = 9;
pub const SIGBUS: i32 = 10;
pub const SIGSEGV: i32 = 11;
pub const SIGSYS: i32 = 12;
pub const SIGPIPE: i32 = 13;
pub const SIGALRM: i32 = 14;
pub const SIGTERM: i32 = 15;
pub const SIGUSR1: i32 = 16;
pub const SIGUSR2: i32 = 17;
pub const SIGCHLD: i32 = 18;
pub const SIGPWR: i32 = 19;
pub const SIGWINCH: i32 = 20;
pub const SIGURG: i32 = 21;
pub const SIGIO: i32 = 22;
pub const SIGSTOP: i32 = 23;
pub const SIGTSTP: i32 = 24;
pub const SIGCONT: i32 = 25;
pub const SIGTTIN: i32 = 26;
pub const SIGTTOU: i32 = 27;
pub const SIGVTALRM: i32 = 28;
pub const SIGPROF: i32 = 29;
pub const SIGXCPU: i32 = 30;
pub const SIGXFSZ: i32 = 31;
pub const SIGRTMIN: i32 = 41;
pub const SIGRTMAX: i32 = 56;
pub const SIGSELECT: i32 = 57;
pub const SIGPHOTON: i32 = 58;

/// A signal independent of the target's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSignal
{
    Hup,
    Int,
    Quit,
    Ill,
    Trap,
    Abrt,
    Emt,
    Fpe,
    Kill,
    Bus,
    Segv,
    Sys,
    Pipe,
    Alrm,
    Term,
    Usr1,
    Usr2,
    Chld,
    Pwr,
    Winch,
    Urg,
    Io,
    Stop,
    Tstp,
    Cont,
    Ttin,
    Ttou,
    Vtalrm,
    Prof,
    Xcpu,
    Xfsz,
    /// `SIGRTMIN + n`
    Realtime(u8),
    Select,
    Photon,
    /// A number with no known meaning.
    Unknown(i32),
}

const FIXED: [(i32, TargetSignal, &str); 33] = [
    (SIGHUP, TargetSignal::Hup, "SIGHUP"),
    (SIGINT, TargetSignal::Int, "SIGINT"),
    (SIGQUIT, TargetSignal::Quit, "SIGQUIT"),
    (SIGILL, TargetSignal::Ill, "SIGILL"),
    (SIGTRAP, TargetSignal::Trap, "SIGTRAP"),
    (SIGABRT, TargetSignal::Abrt, "SIGABRT"),
    (SIGEMT, TargetSignal::Emt, "SIGEMT"),
    (SIGFPE, TargetSignal::Fpe, "SIGFPE"),
    (SIGKILL, TargetSignal::Kill, "SIGKILL"),
    (SIGBUS, TargetSignal::Bus, "SIGBUS"),
    (SIGSEGV, TargetSignal::Segv, "SIGSEGV"),
    (SIGSYS, TargetSignal::Sys, "SIGSYS"),
    (SIGPIPE, TargetSignal::Pipe, "SIGPIPE"),
    (SIGALRM, TargetSignal::Alrm, "SIGALRM"),
    (SIGTERM, TargetSignal::Term, "SIGTERM"),
    (SIGUSR1, TargetSignal::Usr1, "SIGUSR1"),
    (SIGUSR2, TargetSignal::Usr2, "SIGUSR2"),
    (SIGCHLD, TargetSignal::Chld, "SIGCHLD"),
    (SIGPWR, TargetSignal::Pwr, "SIGPWR"),
    (SIGWINCH, TargetSignal::Winch, "SIGWINCH"),
    (SIGURG, TargetSignal::Urg, "SIGURG"),
    (SIGIO, TargetSignal::Io, "SIGIO"),
    (SIGSTOP, TargetSignal::Stop, "SIGSTOP"),
    (SIGTSTP, TargetSignal::Tstp, "SIGTSTP"),
    (SIGCONT, TargetSignal::Cont, "SIGCONT"),
    (SIGTTIN, TargetSignal::Ttin, "SIGTTIN"),
    (SIGTTOU, TargetSignal::Ttou, "SIGTTOU"),
    (SIGVTALRM, TargetSignal::Vtalrm, "SIGVTALRM"),
    (SIGPROF, TargetSignal::Prof, "SIGPROF"),
    (SIGXCPU, TargetSignal::Xcpu, "SIGXCPU"),
    (SIGXFSZ, TargetSignal::Xfsz, "SIGXFSZ"),
    (SIGSELECT, TargetSignal::Select, "SIGSELECT"),
    (SIGPHOTON, TargetSignal::Photon, "SIGPHOTON"),
];

impl TargetSignal
{
    /// Map a Neutrino signal number. `0` means "no signal".
    #[must_use]
    pub fn from_nto(signo: i32) -> Option<Self>
    {
        if signo == 0 {
            return None;
        }
        if (SIGRTMIN..=SIGRTMAX).contains(&signo) {
            return Some(TargetSignal::Realtime((signo - SIGRTMIN) as u8));
        }
        Some(
            FIXED
                .iter()
                .find(|(n, _, _)| *n == signo)
                .map_or(TargetSignal::Unknown(signo), |(_, sig, _)| *sig),
        )
    }

    /// The Neutrino signal number.
    #[must_use]
    pub fn to_nto(self) -> i32
    {
        match self {
            TargetSignal::Realtime(n) => SIGRTMIN + i32::from(n),
            TargetSignal::Unknown(n) => n,
            other => FIXED
                .iter()
                .find(|(_, sig, _)| *sig == other)
                .map_or(0, |(n, _, _)| *n),
        }
    }
}

impl fmt::Display for TargetSignal
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            TargetSignal::Realtime(n) => write!(f, "SIGRTMIN+{n}"),
            TargetSignal::Unknown(n) => write!(f, "signal {n}"),
            other => {
                let name = FIXED
                    .iter()
                    .find(|(_, sig, _)| sig == other)
                    .map_or("SIG?", |(_, _, name)| *name);
                f.write_str(name)
            }
        }
    }
}

/// What the debugger does when a signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDisposition
{
    /// Stop the program and report.
    pub stop: bool,
    /// Print a message when it arrives.
    pub print: bool,
    /// Deliver it to the program on resume.
    pub pass: bool,
}

impl SignalDisposition
{
    pub const DEFAULT: Self = Self {
        stop: true,
        print: true,
        pass: true,
    };

    pub const QUIET: Self = Self {
        stop: false,
        print: false,
        pass: true,
    };

    /// `true` when the target may handle the signal without the debugger.
    #[must_use]
    pub const fn is_transparent(self) -> bool
    {
        !self.stop && !self.print && self.pass
    }
}

const TABLE_LEN: usize = SIGPHOTON as usize;

/// Dispositions for signals `1..=SIGPHOTON`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTable
{
    entries: [SignalDisposition; TABLE_LEN],
}

impl Default for SignalTable
{
    /// Everything stops and prints, except `SIG45`, `SIGSELECT` and
    /// `SIGPHOTON`, which the runtime uses internally.
    fn default() -> Self
    {
        let mut table = Self {
            entries: [SignalDisposition::DEFAULT; TABLE_LEN],
        };
        for signo in [45, SIGSELECT, SIGPHOTON] {
            table.set(signo, SignalDisposition::QUIET);
        }
        table
    }
}

impl SignalTable
{
    fn slot(signo: i32) -> Option<usize>
    {
        let index = usize::try_from(signo).ok()?.checked_sub(1)?;
        (index < TABLE_LEN).then_some(index)
    }

    /// Disposition of `signo`, or the default for numbers outside the table.
    #[must_use]
    pub fn get(&self, signo: i32) -> SignalDisposition
    {
        Self::slot(signo).map_or(SignalDisposition::DEFAULT, |i| self.entries[i])
    }

    /// Numbers outside `1..=SIGPHOTON` are ignored.
    pub fn set(&mut self, signo: i32, disposition: SignalDisposition)
    {
        if let Some(i) = Self::slot(signo) {
            self.entries[i] = disposition;
        }
    }

    /// Build the `DStMsg_handlesig` table (signals `1..=QNXNTO_NSIG`).
    #[must_use]
    pub fn handlesig_table(&self) -> [u8; QNXNTO_NSIG]
    {
        let mut table = [1u8; QNXNTO_NSIG];
        for (out, disposition) in table.iter_mut().zip(self.entries.iter()) {
            if disposition.is_transparent() {
                *out = 0;
            }
        }
        table
    }

    /// Signals the native backend must trace (anything not transparent).
    pub fn traced(&self) -> impl Iterator<Item = i32> + '_
    {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_transparent())
            .map(|(i, _)| i as i32 + 1)
    }
}
