//! Remote target against an in-memory pdebug agent.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;

use ntodbg_core::arch::ppc::{PpcCodec, PPC_FP0_REGNUM};
use ntodbg_core::arch::Architecture;
use ntodbg_core::breakpoints::BreakpointKind;
use ntodbg_core::remote::RemoteTarget;
use ntodbg_core::signals::{TargetSignal, SIGSEGV, SIGUSR1};
use ntodbg_core::target::{MemoryAccess, Target};
use ntodbg_core::types::{Address, ProcessId, ThreadId, WaitStatus};
use ntodbg_protocol::codec::PayloadWriter;
use ntodbg_protocol::frame::{encode_frame, FrameDecoder};
use ntodbg_protocol::messages::{brk, RegSubcmd, RunMode};
use ntodbg_protocol::{
    Channel, DsHeader, Endian, Notification, NotifyEvent, PdebugErrorCode, Request, Response, DS_DATA_MAX_SIZE,
};

const MEM_BASE: u64 = 0x1000;

/// Answers requests the way pdebug would, from canned state.
struct FakeAgent
{
    decoder: FrameDecoder,
    rx_channel: Channel,
    input: VecDeque<u8>,
    requests: Vec<Request>,
    regsets: HashMap<RegSubcmd, Vec<u8>>,
    memory: Vec<u8>,
    threads: Vec<(i16, u8)>,
    after_run: VecDeque<NotifyEvent>,
    next_notify_mid: u8,
}

impl FakeAgent
{
    fn new() -> Self
    {
        let mut general = vec![0u8; 52];
        for (i, b) in general.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut regsets = HashMap::new();
        regsets.insert(RegSubcmd::General, general);
        regsets.insert(RegSubcmd::Float, vec![0u8; 512]);
        Self {
            decoder: FrameDecoder::new(),
            rx_channel: Channel::Debug,
            input: VecDeque::new(),
            requests: Vec::new(),
            regsets,
            memory: (0..3000u32).map(|i| (i % 251) as u8).collect(),
            threads: vec![(1, 3), (2, 0), (4, 5)],
            after_run: VecDeque::new(),
            next_notify_mid: 0x80,
        }
    }

    fn push_frame(&mut self, bytes: &[u8])
    {
        self.input.extend(encode_frame(bytes));
    }

    fn notify(&mut self, event: NotifyEvent)
    {
        let notification = Notification {
            mid: self.next_notify_mid,
            pid: 1234,
            tid: 2,
            event,
        };
        self.next_notify_mid = self.next_notify_mid.wrapping_add(1);
        self.push_frame(&notification.encode(Endian::Little));
    }

    fn error() -> Response
    {
        Response::Err {
            errno: 3,
            reason: PdebugErrorCode::NoError,
        }
    }

    fn answer(&mut self, request: &Request) -> Response
    {
        match request {
            Request::ProtoVersion { .. } => Response::OkStatus(0x0003),
            Request::Attach { pid } => {
                let mut w = PayloadWriter::new(Endian::Little);
                w.i32(*pid).i32(3).u32(0).u32(0).u16(0).u16(0).u32(0).cstr("/usr/bin/server");
                Response::OkData(w.finish())
            }
            Request::RegRead { set, offset, size } => match self.regsets.get(set) {
                Some(block) => {
                    let start = usize::from(*offset);
                    let end = (start + usize::from(*size)).min(block.len());
                    Response::OkData(block[start..end].to_vec())
                }
                None => Self::error(),
            },
            Request::RegWrite { set, offset, data } => match self.regsets.get_mut(set) {
                Some(block) => {
                    let start = usize::from(*offset);
                    block[start..start + data.len()].copy_from_slice(data);
                    Response::Ok
                }
                None => Self::error(),
            },
            Request::MemRead { addr, size, .. } => {
                if *addr < MEM_BASE || *addr >= MEM_BASE + self.memory.len() as u64 {
                    return Self::error();
                }
                let start = (*addr - MEM_BASE) as usize;
                let end = (start + usize::from(*size)).min(self.memory.len());
                Response::OkData(self.memory[start..end].to_vec())
            }
            Request::MemWrite { data, .. } => Response::OkStatus(data.len() as i32),
            Request::Run(_) => {
                if let Some(event) = self.after_run.pop_front() {
                    self.notify(event);
                }
                Response::Ok
            }
            Request::Stop { .. } => {
                self.notify(NotifyEvent::Stopped);
                Response::Ok
            }
            Request::PidList { pid, tid, .. } => {
                let tids: Vec<_> = self.threads.iter().filter(|(t, _)| i32::from(*t) >= *tid).collect();
                if tids.is_empty() {
                    return Self::error();
                }
                let mut w = PayloadWriter::new(Endian::Little);
                w.i32(*pid).i32(tids.len() as i32).pad(24);
                for (t, state) in tids {
                    w.i16(*t).u8(*state).u8(0);
                }
                w.i16(0).u8(0).u8(0);
                Response::OkData(w.finish())
            }
            _ => Response::Ok,
        }
    }

    fn handle_frame(&mut self, frame: &[u8])
    {
        if frame.len() == 1 {
            if let Some(channel) = Channel::from_u8(frame[0]) {
                self.rx_channel = channel;
            }
            return;
        }
        if self.rx_channel != Channel::Debug {
            return;
        }
        let Ok(header) = DsHeader::parse(frame) else { return };
        if !header.command.is_request() {
            return;
        }
        let (_, request) = Request::decode(frame).unwrap();
        let response = self.answer(&request);
        self.requests.push(request);
        let bytes = response.encode(header.mid, Endian::Little).unwrap();
        self.push_frame(&bytes);
    }

    fn requests_of(&self, pred: impl Fn(&Request) -> bool) -> Vec<Request>
    {
        self.requests.iter().filter(|r| pred(r)).cloned().collect()
    }
}

impl Read for FakeAgent
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>
    {
        if self.input.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeAgent
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>
    {
        for &byte in buf {
            if let Some(frame) = self.decoder.push(byte) {
                let frame = frame.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                self.handle_frame(&frame);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()>
    {
        Ok(())
    }
}

fn attached() -> RemoteTarget<FakeAgent>
{
    let mut target = RemoteTarget::new(FakeAgent::new(), Architecture::X86);
    assert_eq!(target.connect().unwrap(), (0, 3));
    target.attach(ProcessId(1234)).unwrap();
    target
}

fn agent(target: &mut RemoteTarget<FakeAgent>) -> &mut FakeAgent
{
    target.client_mut().transport_mut()
}

#[test]
fn test_attach_reports_thread_and_sends_signal_filter()
{
    let mut target = RemoteTarget::new(FakeAgent::new(), Architecture::X86);
    target.connect().unwrap();
    let tid = target.attach(ProcessId(1234)).unwrap();

    assert_eq!(tid, ThreadId(3));
    assert_eq!(target.pid(), Some(ProcessId(1234)));
    let tables = agent(&mut target).requests_of(|r| matches!(r, Request::HandleSignals { .. }));
    let Request::HandleSignals { table } = &tables[0] else {
        panic!("no handlesig sent");
    };
    assert_eq!(table[44], 0);
    assert_eq!(table[56], 0);
    assert_eq!(table[(SIGSEGV - 1) as usize], 1);
}

#[test]
fn test_fetch_registers_through_wire_spans()
{
    let mut target = attached();
    target.fetch_registers().unwrap();

    // eip lives at offset 32 of the general block, which holds 0, 1, 2, ...
    assert_eq!(target.pc(), Some(Address::new(0x2322_2120)));
    let reads = agent(&mut target).requests_of(|r| matches!(r, Request::RegRead { .. }));
    for read in reads {
        let Request::RegRead { set, offset, size } = read else { unreachable!() };
        let area = if set == RegSubcmd::General { 52 } else { 512 };
        assert!(usize::from(offset) + usize::from(size) <= area);
    }
}

#[test]
fn test_fetch_tolerates_missing_float_block()
{
    let mut target = attached();
    agent(&mut target).regsets.remove(&RegSubcmd::Float);
    target.fetch_registers().unwrap();
    assert!(target.pc().is_some());
}

#[test]
fn test_store_register_only_touches_its_slot()
{
    let mut target = attached();
    target.fetch_registers().unwrap();
    let before = agent(&mut target).regsets[&RegSubcmd::General].clone();

    let eip = target.codec().register_number("eip").unwrap();
    let endian = target.endian();
    target.registers_mut().write_u64(eip, 4, endian, 0xdead_beef);
    target.store_registers(eip, eip).unwrap();

    let after = &agent(&mut target).regsets[&RegSubcmd::General];
    assert_eq!(&after[32..36], &0xdead_beefu32.to_le_bytes());
    assert_eq!(&after[..32], &before[..32]);
    assert_eq!(&after[36..], &before[36..]);
}

#[test]
fn test_float_store_is_not_sent()
{
    let mut target = attached();
    target.fetch_registers().unwrap();
    let st0 = target.codec().register_number("st0").unwrap();
    target.store_registers(st0, st0).unwrap();

    let writes = agent(&mut target).requests_of(|r| matches!(r, Request::RegWrite { .. }));
    assert!(writes.is_empty());
}

#[test]
fn test_ppc_float_store_with_empty_float_block()
{
    let codec = PpcCodec::new().float_area_fallthrough(true);
    let mut target = RemoteTarget::with_codec(FakeAgent::new(), Box::new(codec), Endian::Little);
    target.connect().unwrap();
    target.attach(ProcessId(1234)).unwrap();
    target.registers_mut().supply(PPC_FP0_REGNUM, &[0x11; 8]);

    target.store_registers(PPC_FP0_REGNUM, PPC_FP0_REGNUM).unwrap();

    let transfers = agent(&mut target).requests_of(|r| matches!(r, Request::RegRead { .. } | Request::RegWrite { .. }));
    assert!(transfers.is_empty());
}

#[test]
fn test_large_memory_read_is_chunked()
{
    let mut target = attached();
    let mut buf = vec![0u8; 2500];
    let n = target.read_memory(Address::new(MEM_BASE), &mut buf).unwrap();

    assert_eq!(n, 2500);
    assert_eq!(buf[1024], (1024 % 251) as u8);
    let sizes: Vec<u16> = agent(&mut target)
        .requests_of(|r| matches!(r, Request::MemRead { .. }))
        .into_iter()
        .map(|r| match r {
            Request::MemRead { size, .. } => size,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(sizes, vec![DS_DATA_MAX_SIZE as u16, DS_DATA_MAX_SIZE as u16, 452]);
}

#[test]
fn test_memory_read_past_the_end_is_short()
{
    let mut target = attached();
    let mut buf = vec![0u8; 200];
    let n = target
        .read_memory(Address::new(MEM_BASE + 2900), &mut buf)
        .unwrap();
    assert_eq!(n, 100);

    assert_eq!(target.read_memory(Address::new(0x10), &mut buf).unwrap(), 0);
}

#[test]
fn test_resume_with_signal_then_breakpoint_stop()
{
    let mut target = attached();
    let id = target
        .insert_breakpoint(Address::new(0x0804_8100), BreakpointKind::Software, 0)
        .unwrap();
    agent(&mut target).after_run.push_back(NotifyEvent::Brk {
        ip: 0x0804_8100,
        dp: 0,
        flags: u32::from(brk::EXEC),
    });

    target.resume(None, false, Some(TargetSignal::Usr1)).unwrap();
    let event = target.wait().unwrap();

    assert_eq!(event.status, WaitStatus::Stopped(TargetSignal::Trap));
    assert_eq!(event.tid, Some(ThreadId(2)));
    assert_eq!(target.breakpoints().get(id).unwrap().hit_count, 1);

    let sent = &agent(&mut target).requests;
    let kill = sent.iter().position(|r| matches!(r, Request::Kill { signo, .. } if *signo == SIGUSR1));
    let run = sent.iter().position(|r| *r == Request::Run(RunMode::Continue));
    assert!(kill.unwrap() < run.unwrap());
}

#[test]
fn test_faulted_unload_reports_signal()
{
    let mut target = attached();
    agent(&mut target).after_run.push_back(NotifyEvent::PidUnload {
        status: SIGSEGV,
        faulted: true,
    });
    target.resume(None, false, None).unwrap();

    let event = target.wait().unwrap();
    assert_eq!(event.status, WaitStatus::Signalled(TargetSignal::Segv));
    assert_eq!(event.tid, None);
    assert_eq!(target.pid(), None);
}

#[test]
fn test_clean_unload_reports_exit_code()
{
    let mut target = attached();
    agent(&mut target).after_run.push_back(NotifyEvent::PidUnload {
        status: 7,
        faulted: false,
    });
    target.resume(None, true, None).unwrap();

    assert_eq!(target.wait().unwrap().status, WaitStatus::Exited(7));
    let runs = agent(&mut target).requests_of(|r| matches!(r, Request::Run(_)));
    assert_eq!(runs, vec![Request::Run(RunMode::Count(1))]);
}

#[test]
fn test_interrupt_sends_stop()
{
    let mut target = attached();
    target.resume(None, false, None).unwrap();
    target.interrupt_flag().store(true, Ordering::SeqCst);

    let event = target.wait().unwrap();
    assert_eq!(event.status, WaitStatus::Stopped(TargetSignal::Int));
}

#[test]
fn test_threads_from_pidlist()
{
    let mut target = attached();
    let threads = target.threads().unwrap();
    let tids: Vec<_> = threads.iter().map(|t| t.tid).collect();
    assert_eq!(tids, vec![ThreadId(1), ThreadId(4)]);
}

#[test]
fn test_breakpoint_insert_and_remove_requests()
{
    let mut target = attached();
    let id = target
        .insert_breakpoint(Address::new(0x4000), BreakpointKind::Software, 0)
        .unwrap();
    target.remove_breakpoint(id).unwrap();

    let breaks = agent(&mut target).requests_of(|r| matches!(r, Request::Break { .. }));
    assert_eq!(
        breaks,
        vec![
            Request::Break {
                flags: brk::EXEC,
                addr: 0x4000,
                size: 0,
            },
            Request::Break {
                flags: brk::EXEC,
                addr: 0x4000,
                size: -1,
            },
        ]
    );
    assert!(target.breakpoints().is_empty());
}
