//! Tests for platform-agnostic types

use ntodbg_core::signals::{SignalDisposition, SignalTable, TargetSignal, SIGCONT, SIGSELECT, SIGUSR1};
use ntodbg_core::types::{Address, ProcessId, ThreadId, ThreadInfo, ThreadState, WaitStatus};

#[test]
fn test_process_id_from_i32()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
    let value: i32 = pid.into();
    assert_eq!(value, 12345);
}

#[test]
fn test_thread_id_display()
{
    assert_eq!(ThreadId(7).to_string(), "7");
    assert_eq!(ThreadId(7).raw(), 7);
}

#[test]
fn test_address_arithmetic()
{
    let base = Address::from(0x1000u32);
    assert_eq!((base + 0x20).value(), 0x1020);
    assert_eq!((base - 0x10).value(), 0xff0);
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert_eq!(Address::new(0x10).offset_by(-0x10), Address::ZERO);
}

#[test]
fn test_address_truncate()
{
    assert_eq!(Address::new(0xdead_0000_1234).truncate(4), Address::new(0x1234));
    assert_eq!(Address::new(0xdead_0000_1234).truncate(8), Address::new(0xdead_0000_1234));
}

#[test]
fn test_thread_state_names()
{
    assert_eq!(ThreadState::from_u8(0), ThreadState::Dead);
    assert_eq!(ThreadState::from_u8(20).to_string(), "NET_REPLY");
    assert_eq!(ThreadState::from_u8(99), ThreadState::Unknown(99));
    let info = ThreadInfo {
        tid: ThreadId(2),
        state: ThreadState::Reply,
        flags: 0,
    };
    assert_eq!(info.extra_info(), "tid 2 REPLY");
}

#[test]
fn test_wait_status_display()
{
    assert_eq!(WaitStatus::Exited(3).to_string(), "exited with code 3");
    assert_eq!(WaitStatus::Stopped(TargetSignal::Trap).to_string(), "stopped (SIGTRAP)");
    assert_eq!(WaitStatus::Signalled(TargetSignal::Segv).to_string(), "terminated by SIGSEGV");
}

#[test]
fn test_signal_numbering()
{
    assert_eq!(TargetSignal::from_nto(0), None);
    assert_eq!(TargetSignal::from_nto(SIGUSR1), Some(TargetSignal::Usr1));
    assert_eq!(TargetSignal::from_nto(SIGCONT).map(TargetSignal::to_nto), Some(SIGCONT));
    assert_eq!(TargetSignal::from_nto(42), Some(TargetSignal::Realtime(1)));
}

#[test]
fn test_quiet_signals_pass_through_agent()
{
    let mut table = SignalTable::default();
    assert_eq!(table.handlesig_table()[(SIGSELECT - 1) as usize], 0);

    table.set(SIGSELECT, SignalDisposition::DEFAULT);
    assert_eq!(table.handlesig_table()[(SIGSELECT - 1) as usize], 1);
}
