//! `/proc` session behaviour against a scripted device.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ntodbg_core::arch::{Architecture, RegisterSet};
use ntodbg_core::breakpoints::{BreakpointKind, WatchKind, BREAK_REMOVE_SIZE};
use ntodbg_core::procfs::device::{ProcfsDevice, ProcfsHost, WaitOutcome};
use ntodbg_core::procfs::types::{flags, run, FaultSet, ProcessInfo, ProcfsBreak, ProcfsRun, ProcfsStatus, StopWhy};
use ntodbg_core::procfs::{classify_stop, InterruptAction, ProcfsConfig, ProcfsSession, SessionState};
use ntodbg_core::signals::{TargetSignal, SIGCONT, SIGKILL, SIGSEGV, SIGTRAP, SIGUSR1};
use ntodbg_core::target::{MemoryAccess, Target};
use ntodbg_core::types::{Address, ProcessId, ThreadId, WaitStatus};
use ntodbg_core::NtoError;

#[derive(Default)]
struct Script
{
    opened: Vec<PathBuf>,
    fail_open: bool,
    calls: Vec<&'static str>,
    statuses: VecDeque<ProcfsStatus>,
    last_status: ProcfsStatus,
    events: VecDeque<WaitOutcome>,
    threads: Vec<ProcfsStatus>,
    regsets: HashMap<RegisterSet, Vec<u8>>,
    written: Vec<(RegisterSet, Vec<u8>)>,
    runs: Vec<ProcfsRun>,
    breaks: Vec<ProcfsBreak>,
    signals: Vec<(Option<ThreadId>, i32)>,
    reap_status: i32,
}

type Shared = Rc<RefCell<Script>>;

struct FakeHost(Shared);

struct FakeDevice(Shared);

impl ProcfsHost for FakeHost
{
    type Device = FakeDevice;

    fn open(&mut self, path: &Path, _pid: ProcessId) -> io::Result<FakeDevice>
    {
        let mut script = self.0.borrow_mut();
        script.opened.push(path.to_path_buf());
        if script.fail_open {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(FakeDevice(Rc::clone(&self.0)))
    }
}

impl ProcfsDevice for FakeDevice
{
    fn stop(&mut self) -> io::Result<ProcfsStatus>
    {
        let mut s = self.0.borrow_mut();
        s.calls.push("stop");
        Ok(s.last_status)
    }

    fn status(&mut self) -> io::Result<ProcfsStatus>
    {
        let mut s = self.0.borrow_mut();
        s.calls.push("status");
        if let Some(next) = s.statuses.pop_front() {
            s.last_status = next;
        }
        Ok(s.last_status)
    }

    fn thread_status(&mut self, tid: ThreadId) -> io::Result<Option<ProcfsStatus>>
    {
        let s = self.0.borrow();
        Ok(s.threads.iter().find(|t| t.tid >= tid.raw()).copied())
    }

    fn set_current_thread(&mut self, _tid: ThreadId) -> io::Result<()>
    {
        self.0.borrow_mut().calls.push("curthread");
        Ok(())
    }

    fn run(&mut self, params: &ProcfsRun) -> io::Result<()>
    {
        let mut s = self.0.borrow_mut();
        s.calls.push("run");
        s.runs.push(*params);
        Ok(())
    }

    fn arm_stop_event(&mut self) -> io::Result<()>
    {
        self.0.borrow_mut().calls.push("event");
        Ok(())
    }

    fn read_regset(&mut self, set: RegisterSet) -> io::Result<Vec<u8>>
    {
        self.0
            .borrow()
            .regsets
            .get(&set)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
    }

    fn write_regset(&mut self, set: RegisterSet, data: &[u8]) -> io::Result<()>
    {
        self.0.borrow_mut().written.push((set, data.to_vec()));
        Ok(())
    }

    fn set_break(&mut self, brk: &ProcfsBreak) -> io::Result<()>
    {
        self.0.borrow_mut().breaks.push(*brk);
        Ok(())
    }

    fn info(&mut self) -> io::Result<ProcessInfo>
    {
        Ok(ProcessInfo {
            pid: 1234,
            num_threads: 2,
            ..ProcessInfo::default()
        })
    }

    fn exec_path(&mut self) -> io::Result<String>
    {
        Ok("/usr/bin/server".to_string())
    }

    fn read_memory(&mut self, _addr: u64, _buf: &mut [u8]) -> io::Result<usize>
    {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn write_memory(&mut self, _addr: u64, data: &[u8]) -> io::Result<usize>
    {
        Ok(data.len())
    }

    fn wait_for_event(&mut self) -> io::Result<WaitOutcome>
    {
        let mut s = self.0.borrow_mut();
        s.calls.push("wait_event");
        Ok(s.events.pop_front().unwrap_or(WaitOutcome::Event))
    }

    fn signal(&mut self, tid: Option<ThreadId>, signo: i32) -> io::Result<()>
    {
        let mut s = self.0.borrow_mut();
        s.calls.push("signal");
        s.signals.push((tid, signo));
        Ok(())
    }

    fn reap(&mut self) -> io::Result<i32>
    {
        Ok(self.0.borrow().reap_status)
    }
}

fn stopped_status(why: StopWhy, signo: i32) -> ProcfsStatus
{
    ProcfsStatus {
        pid: 1234,
        tid: 1,
        flags: flags::STOPPED | flags::ISTOP,
        why,
        signo,
        ..ProcfsStatus::default()
    }
}

fn running_status() -> ProcfsStatus
{
    ProcfsStatus {
        pid: 1234,
        tid: 1,
        ..ProcfsStatus::default()
    }
}

fn session() -> (ProcfsSession<FakeHost>, Shared)
{
    let script = Shared::default();
    let session = ProcfsSession::new(FakeHost(Rc::clone(&script)), Architecture::X86, ProcfsConfig::default());
    (session, script)
}

fn attached() -> (ProcfsSession<FakeHost>, Shared)
{
    let (mut session, script) = session();
    script.borrow_mut().last_status = running_status();
    session.attach(ProcessId(1234)).unwrap();
    script.borrow_mut().calls.clear();
    (session, script)
}

#[test]
fn test_attach_stops_and_continues_a_stopped_process()
{
    let (mut session, script) = session();
    script.borrow_mut().last_status = ProcfsStatus {
        pid: 1234,
        tid: 1,
        flags: flags::STOPPED,
        ..ProcfsStatus::default()
    };

    let tid = session.attach(ProcessId(1234)).unwrap();

    assert_eq!(tid, ThreadId(1));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.pid(), Some(ProcessId(1234)));
    let s = script.borrow();
    assert_eq!(s.opened, vec![PathBuf::from("/proc/1234/as")]);
    assert_eq!(s.calls, vec!["stop", "event", "status", "signal"]);
    assert_eq!(s.signals, vec![(None, SIGCONT)]);
}

#[test]
fn test_attach_running_process_sends_no_signal()
{
    let (_session, script) = attached();
    assert!(script.borrow().signals.is_empty());
}

#[test]
fn test_attach_open_failure()
{
    let (mut session, script) = session();
    script.borrow_mut().fail_open = true;

    let err = session.attach(ProcessId(77)).unwrap_err();
    assert!(matches!(err, NtoError::AttachFailed { pid: ProcessId(77), .. }));
    assert_eq!(session.state(), SessionState::Unattached);
}

#[test]
fn test_control_path_on_remote_node()
{
    let config = ProcfsConfig {
        node: Some("node7".to_string()),
        ..ProcfsConfig::default()
    };
    assert_eq!(config.control_path(ProcessId(42)), PathBuf::from("/net/node7/proc/42/as"));
}

#[test]
fn test_breakpoint_fault_reports_trap()
{
    let (mut session, script) = attached();
    script
        .borrow_mut()
        .statuses
        .extend([running_status(), stopped_status(StopWhy::Faulted, SIGTRAP)]);

    let event = session.wait().unwrap();

    assert_eq!(event.status, WaitStatus::Stopped(TargetSignal::Trap));
    assert_eq!(event.tid, Some(ThreadId(1)));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(script.borrow().calls, vec!["status", "wait_event", "status"]);
}

#[test]
fn test_exit_reports_exit_code()
{
    let (mut session, script) = attached();
    {
        let mut s = script.borrow_mut();
        s.statuses.push_back(stopped_status(StopWhy::Terminated, 0));
        s.reap_status = 3 << 8;
    }

    let event = session.wait().unwrap();

    assert_eq!(event.status, WaitStatus::Exited(3));
    assert_eq!(event.tid, None);
    assert_eq!(session.state(), SessionState::Exited(3));
    assert_eq!(session.pid(), None);
}

#[test]
fn test_termination_after_fault_reports_fault_signal()
{
    let (mut session, script) = attached();
    script
        .borrow_mut()
        .statuses
        .push_back(stopped_status(StopWhy::Faulted, SIGSEGV));
    assert_eq!(session.wait().unwrap().status, WaitStatus::Stopped(TargetSignal::Segv));

    session.resume(None, false, Some(TargetSignal::Segv)).unwrap();
    script
        .borrow_mut()
        .statuses
        .push_back(stopped_status(StopWhy::Terminated, 0));

    assert_eq!(session.wait().unwrap().status, WaitStatus::Signalled(TargetSignal::Segv));
    assert_eq!(session.state(), SessionState::Signalled(TargetSignal::Segv));
}

#[test]
fn test_requested_stop_reports_interrupt()
{
    let (mut session, script) = attached();
    script
        .borrow_mut()
        .statuses
        .push_back(stopped_status(StopWhy::Requested, 0));
    assert_eq!(session.wait().unwrap().status, WaitStatus::Stopped(TargetSignal::Int));
}

#[test]
fn test_single_step_wins_over_why()
{
    let mut status = stopped_status(StopWhy::Signalled, SIGUSR1);
    status.flags |= flags::SSTEP;
    let mut exit_signo = Some(TargetSignal::Segv);
    let result = classify_stop(&status, &mut exit_signo, || unreachable!());
    assert_eq!(result, WaitStatus::Stopped(TargetSignal::Trap));
}

#[test]
fn test_resume_without_signal_clears_pending()
{
    let (mut session, script) = attached();
    session.resume(None, true, None).unwrap();

    let s = script.borrow();
    let params = s.runs[0];
    assert_eq!(
        params.flags,
        run::FAULT | run::TRACE | run::ARM | run::STEP | run::CLRSIG | run::CLRFLT
    );
    assert_eq!(params.fault, FaultSet::DEBUGGER);
    assert!(params.trace.contains(SIGUSR1));
    assert!(!params.trace.contains(57));
    drop(s);
    assert_eq!(session.state(), SessionState::Running);
}

#[test]
fn test_resume_with_pending_signal_passes_it_through()
{
    let (mut session, script) = attached();
    script.borrow_mut().last_status = stopped_status(StopWhy::Signalled, SIGUSR1);

    session
        .resume(Some(ThreadId(1)), false, Some(TargetSignal::Usr1))
        .unwrap();

    let s = script.borrow();
    assert!(s.signals.is_empty());
    let params = s.runs[0];
    assert_eq!(params.flags & (run::CLRSIG | run::CLRFLT), 0);
    assert!(!params.trace.contains(SIGUSR1));
    assert_eq!(s.calls[0], "curthread");
}

#[test]
fn test_resume_with_other_signal_delivers_it()
{
    let (mut session, script) = attached();
    script.borrow_mut().last_status = stopped_status(StopWhy::Faulted, SIGSEGV);

    session.resume(None, false, Some(TargetSignal::Usr1)).unwrap();

    let s = script.borrow();
    assert_eq!(s.signals, vec![(None, SIGUSR1)]);
    assert_ne!(s.runs[0].flags & run::CLRSIG, 0);
    assert_ne!(s.runs[0].flags & run::CLRFLT, 0);
}

#[test]
fn test_thread_scan_skips_dead_threads()
{
    let (mut session, script) = attached();
    script.borrow_mut().threads = vec![
        ProcfsStatus {
            tid: 1,
            state: 2,
            ..ProcfsStatus::default()
        },
        ProcfsStatus {
            tid: 3,
            state: 0,
            ..ProcfsStatus::default()
        },
        ProcfsStatus {
            tid: 7,
            state: 5,
            ..ProcfsStatus::default()
        },
    ];

    let threads = session.threads().unwrap();
    let tids: Vec<_> = threads.iter().map(|t| t.tid).collect();
    assert_eq!(tids, vec![ThreadId(1), ThreadId(7)]);
}

#[test]
fn test_fetch_ignores_missing_float_registers()
{
    let (mut session, script) = attached();
    let mut general = vec![0u8; 52];
    general[32..36].copy_from_slice(&0x0804_8000u32.to_le_bytes());
    script.borrow_mut().regsets.insert(RegisterSet::General, general);

    session.fetch_registers().unwrap();

    assert_eq!(session.pc(), Some(Address::new(0x0804_8000)));
}

#[test]
fn test_fetch_fails_without_general_registers()
{
    let (mut session, _script) = attached();
    let err = session.fetch_registers().unwrap_err();
    assert!(matches!(err, NtoError::Devctl { request: "DCMD_PROC_GETGREG", .. }));
}

#[test]
fn test_store_writes_back_modified_register()
{
    let (mut session, script) = attached();
    script
        .borrow_mut()
        .regsets
        .insert(RegisterSet::General, vec![0u8; 52]);
    session.fetch_registers().unwrap();

    let eip = session.codec().register_number("eip").unwrap();
    let endian = session.endian();
    session.registers_mut().write_u64(eip, 4, endian, 0x1234);
    session.store_registers(eip, eip).unwrap();

    let s = script.borrow();
    assert_eq!(s.written.len(), 1);
    let (set, block) = &s.written[0];
    assert_eq!(*set, RegisterSet::General);
    assert_eq!(&block[32..36], &0x1234u32.to_le_bytes());
}

#[test]
fn test_failed_memory_read_is_short()
{
    let (mut session, _script) = attached();
    let mut buf = [0u8; 8];
    assert_eq!(session.read_memory(Address::new(0x1000), &mut buf).unwrap(), 0);
    assert!(session.read_exact(Address::new(0x1000), &mut buf).is_err());
}

#[test]
fn test_watchpoint_insert_and_remove()
{
    let (mut session, script) = attached();
    let kind = BreakpointKind::Watch(WatchKind::Modify);
    let id = session.insert_breakpoint(Address::new(0x2000), kind, 4).unwrap();
    session.remove_breakpoint(id).unwrap();

    let s = script.borrow();
    assert_eq!(s.breaks.len(), 2);
    assert_eq!(s.breaks[0].size, 4);
    assert_eq!(s.breaks[0].addr, 0x2000);
    assert_eq!(s.breaks[0].break_type, 0x18);
    assert_eq!(i32::from(s.breaks[1].size), BREAK_REMOVE_SIZE);
    assert_eq!(s.breaks[1].break_type, u16::from(kind.remove_type()));
    assert!(session.breakpoints().is_empty());
}

#[test]
fn test_double_interrupt_abandons_process()
{
    let (mut session, script) = attached();
    script
        .borrow_mut()
        .events
        .extend([WaitOutcome::Interrupted, WaitOutcome::Interrupted]);
    session.set_interrupt_handler(|| InterruptAction::Abandon);

    let err = session.wait().unwrap_err();

    assert!(matches!(err, NtoError::Interrupted));
    assert_eq!(session.state(), SessionState::Unattached);
    let s = script.borrow();
    assert!(s.calls.contains(&"stop"));
    assert_eq!(s.signals, vec![(None, SIGKILL)]);
}

#[test]
fn test_detach_removes_breakpoints()
{
    let (mut session, script) = attached();
    session
        .insert_breakpoint(Address::new(0x4000), BreakpointKind::Software, 0)
        .unwrap();
    session.detach(None).unwrap();

    assert_eq!(session.state(), SessionState::Detached);
    assert_eq!(script.borrow().breaks.len(), 2);
    assert!(matches!(session.fetch_registers(), Err(NtoError::NotAttached)));
}

#[test]
fn test_process_info_and_exec_file()
{
    let (mut session, _script) = attached();
    assert_eq!(session.process_info().unwrap().num_threads, 2);
    assert_eq!(session.exec_file().unwrap(), "/usr/bin/server");
}

#[cfg(not(target_os = "nto"))]
#[test]
fn test_native_session_unavailable_off_qnx()
{
    assert!(matches!(
        ntodbg_core::procfs::native_session(ProcfsConfig::default(), Default::default()),
        Err(NtoError::UnsupportedPlatform)
    ));
}
