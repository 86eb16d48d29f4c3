//! # Debug-channel messages
//!
//! Target-bound requests (`DStMsg_*`) and host-bound responses (`DSrMsg_*`).
//!
//! ## Request/response pairing
//!
//! Every request is answered by exactly one of:
//!
//! | response | meaning |
//! |---|---|
//! | `DSrMsg_err` | failed; `errno` plus a [`PdebugErrorCode`] in the subcmd byte |
//! | `DSrMsg_ok` | bare success |
//! | `DSrMsg_okstatus` | success with a 32-bit status (e.g. bytes written) |
//! | `DSrMsg_okdata` | success with at most [`DS_DATA_MAX_SIZE`] bytes of data |
//!
//! ## Payload layouts
//!
//! Layouts are packed and follow the header's byte order. Variable-length
//! payloads (memory, registers, files, environment) are bounded by
//! [`DS_DATA_MAX_SIZE`]; larger transfers are split by the caller.

use std::fmt;

use crate::codec::{PayloadReader, PayloadWriter};
use crate::error::{ProtocolError, Result};
use crate::header::{Command, DsHeader, Endian, HEADER_SIZE};

/// Maximum variable-length payload carried by one message.
pub const DS_DATA_MAX_SIZE: usize = 1024;

pub const DS_MSG_OKSTATUS_FLAG: u32 = 0x2000_0000;
pub const DS_MSG_OKDATA_FLAG: u32 = 0x4000_0000;
/// Set in a request's spare word when the host will not wait for a reply.
pub const DS_MSG_NO_RESPONSE: u32 = 0x8000_0000;

/// Number of signals in the `handlesig` table.
pub const QNXNTO_NSIG: usize = 57;

/// Protocol version spoken by this host.
pub const PDEBUG_PROTOVER_MAJOR: u8 = 0;
pub const PDEBUG_PROTOVER_MINOR: u8 = 3;

/// Whether the host waits for a reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode
{
    /// Block until the matching response arrives.
    #[default]
    Expected,
    /// Fire and forget; the agent is told not to reply where the layout allows.
    Suppressed,
}

/// Secondary error reason carried by `DSrMsg_err` (`PDEBUG_E*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdebugErrorCode
{
    NoError,
    NoPty,
    Thread,
    ConsoleInvalid,
    Spawn,
    Procfs,
    ProcStop,
    QpsInfo,
    QMemModel,
    QProxy,
    QDbg,
    Other(u8),
}

impl PdebugErrorCode
{
    #[must_use]
    pub const fn from_u8(value: u8) -> Self
    {
        match value {
            0 => Self::NoError,
            1 => Self::NoPty,
            2 => Self::Thread,
            3 => Self::ConsoleInvalid,
            4 => Self::Spawn,
            5 => Self::Procfs,
            6 => Self::ProcStop,
            7 => Self::QpsInfo,
            8 => Self::QMemModel,
            9 => Self::QProxy,
            10 => Self::QDbg,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8
    {
        match self {
            Self::NoError => 0,
            Self::NoPty => 1,
            Self::Thread => 2,
            Self::ConsoleInvalid => 3,
            Self::Spawn => 4,
            Self::Procfs => 5,
            Self::ProcStop => 6,
            Self::QpsInfo => 7,
            Self::QMemModel => 8,
            Self::QProxy => 9,
            Self::QDbg => 10,
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for PdebugErrorCode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::NoError => f.write_str("no pdebug error"),
            Self::NoPty => f.write_str("no pseudo terminals available"),
            Self::Thread => f.write_str("thread creation failed"),
            Self::ConsoleInvalid => f.write_str("invalid console number"),
            Self::Spawn => f.write_str("spawn failed"),
            Self::Procfs => f.write_str("unable to open /proc"),
            Self::ProcStop => f.write_str("process stop failed"),
            Self::QpsInfo => f.write_str("qnx_psinfo failed"),
            Self::QMemModel => f.write_str("unsupported memory model"),
            Self::QProxy => f.write_str("proxy attach failed"),
            Self::QDbg => f.write_str("__qnx_debug_* failed"),
            Self::Other(value) => write!(f, "pdebug reason {value}"),
        }
    }
}

macro_rules! subcmd_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name
        {
            $($variant = $value),+
        }

        impl $name
        {
            /// Parse a subcommand byte.
            ///
            /// # Errors
            ///
            /// [`ProtocolError::UnexpectedResponse`] when the value is out of range.
            pub fn from_u8(value: u8) -> Result<Self>
            {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(ProtocolError::UnexpectedResponse(format!(
                        "invalid {} subcommand {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

subcmd_enum! {
    /// `DSMSG_LOAD_*`; the inherit-environment flag travels separately.
    LoadMode { Debug = 0, Run = 1, RunPersist = 2 }
}

/// OR'd into the load subcommand when the child should inherit the agent's environment.
pub const DSMSG_LOAD_INHERIT_ENV: u8 = 0x80;

subcmd_enum! {
    /// `DSMSG_ENV_*`
    EnvSubcmd { ClearArgv = 0, AddArg = 1, ClearEnv = 2, SetEnv = 3, SetEnvMore = 4, AddArgMore = 5 }
}

subcmd_enum! {
    StopSubcmd { Pid = 0, Pids = 1 }
}

subcmd_enum! {
    SelectSubcmd { Set = 0, Query = 1 }
}

subcmd_enum! {
    KillSubcmd { PidTid = 0, Pid = 1, Pids = 2 }
}

subcmd_enum! {
    /// `DSMSG_MEM_*` address spaces.
    MemSubcmd { Virtual = 0, Physical = 1, Io = 2, BaseRel = 3 }
}

subcmd_enum! {
    /// `DSMSG_REG_*`: which register block a `regrd`/`regwr` addresses.
    RegSubcmd { General = 0, Float = 1, System = 2, Alt = 3, End = 4 }
}

subcmd_enum! {
    PidListSubcmd { Begin = 0, Next = 1, Specific = 2, SpecificTid = 3 }
}

subcmd_enum! {
    CwdSubcmd { Query = 0, Set = 1 }
}

/// `DSMSG_MAPINFO_*` flag bits.
pub mod mapinfo
{
    pub const BEGIN: u8 = 0x01;
    pub const NEXT: u8 = 0x02;
    pub const SPECIFIC: u8 = 0x04;
    pub const ELF: u8 = 0x80;
}

/// `DSMSG_BRK_*` flag bits.
pub mod brk
{
    pub const EXEC: u8 = 0x0001;
    pub const RD: u8 = 0x0002;
    pub const WR: u8 = 0x0004;
    pub const RW: u8 = 0x0006;
    pub const MODIFY: u8 = 0x0008;
    pub const RDM: u8 = 0x000a;
    pub const WRM: u8 = 0x000c;
    pub const RWM: u8 = 0x000e;
    pub const HW: u8 = 0x0010;
}

/// How far a `DStMsg_run` lets the process go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode
{
    /// Run until the next event.
    Continue,
    /// Single-step `n` instructions.
    Count(u32),
    /// Step while the pc stays in `[start, end)`.
    Range
    {
        start: u32,
        end: u32,
    },
}

impl RunMode
{
    const fn subcmd(self) -> u8
    {
        match self {
            RunMode::Continue => 0,
            RunMode::Count(_) => 1,
            RunMode::Range { .. } => 2,
        }
    }
}

/// A target-bound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request
{
    Connect
    {
        major: u8,
        minor: u8,
    },
    Disconnect,
    Select
    {
        subcmd: SelectSubcmd,
        pid: i32,
        tid: i32,
    },
    MapInfo
    {
        flags: u8,
        pid: i32,
        addr: u32,
    },
    Load
    {
        mode: LoadMode,
        inherit_env: bool,
        argc: i16,
        envc: i16,
        cmdline: Vec<u8>,
    },
    Attach
    {
        pid: i32,
    },
    Detach
    {
        pid: i32,
    },
    Kill
    {
        subcmd: KillSubcmd,
        signo: i32,
    },
    Stop
    {
        subcmd: StopSubcmd,
    },
    MemRead
    {
        space: MemSubcmd,
        addr: u64,
        size: u16,
    },
    MemWrite
    {
        space: MemSubcmd,
        addr: u64,
        data: Vec<u8>,
    },
    RegRead
    {
        set: RegSubcmd,
        offset: u16,
        size: u16,
    },
    RegWrite
    {
        set: RegSubcmd,
        offset: u16,
        data: Vec<u8>,
    },
    Run(RunMode),
    Break
    {
        flags: u8,
        addr: u32,
        /// `0` for an execution breakpoint, `-1` to remove, else the watched length.
        size: i32,
    },
    FileOpen
    {
        mode: i32,
        perms: i32,
        path: String,
    },
    FileRead
    {
        size: u16,
    },
    FileWrite
    {
        data: Vec<u8>,
    },
    FileClose
    {
        mtime: i32,
    },
    PidList
    {
        subcmd: PidListSubcmd,
        pid: i32,
        tid: i32,
    },
    Cwd
    {
        subcmd: CwdSubcmd,
        path: String,
    },
    Env
    {
        subcmd: EnvSubcmd,
        data: Vec<u8>,
    },
    BaseAddress
    {
        addr: u32,
    },
    ProtoVersion
    {
        major: u8,
        minor: u8,
    },
    HandleSignals
    {
        table: [u8; QNXNTO_NSIG],
    },
    CpuInfo,
}

fn check_data_len(len: usize) -> Result<()>
{
    if len > DS_DATA_MAX_SIZE {
        return Err(ProtocolError::PayloadTooLarge { len });
    }
    Ok(())
}

impl Request
{
    /// Command code of this request.
    #[must_use]
    pub const fn command(&self) -> Command
    {
        match self {
            Request::Connect { .. } => Command::Connect,
            Request::Disconnect => Command::Disconnect,
            Request::Select { .. } => Command::Select,
            Request::MapInfo { .. } => Command::MapInfo,
            Request::Load { .. } => Command::Load,
            Request::Attach { .. } => Command::Attach,
            Request::Detach { .. } => Command::Detach,
            Request::Kill { .. } => Command::Kill,
            Request::Stop { .. } => Command::Stop,
            Request::MemRead { .. } => Command::MemRead,
            Request::MemWrite { .. } => Command::MemWrite,
            Request::RegRead { .. } => Command::RegRead,
            Request::RegWrite { .. } => Command::RegWrite,
            Request::Run(_) => Command::Run,
            Request::Break { .. } => Command::Break,
            Request::FileOpen { .. } => Command::FileOpen,
            Request::FileRead { .. } => Command::FileRead,
            Request::FileWrite { .. } => Command::FileWrite,
            Request::FileClose { .. } => Command::FileClose,
            Request::PidList { .. } => Command::PidList,
            Request::Cwd { .. } => Command::Cwd,
            Request::Env { .. } => Command::Env,
            Request::BaseAddress { .. } => Command::BaseAddress,
            Request::ProtoVersion { .. } => Command::ProtoVersion,
            Request::HandleSignals { .. } => Command::HandleSignals,
            Request::CpuInfo => Command::CpuInfo,
        }
    }

    fn subcmd(&self) -> u8
    {
        match self {
            Request::Select { subcmd, .. } => *subcmd as u8,
            Request::MapInfo { flags, .. } => *flags,
            Request::Load { mode, inherit_env, .. } => {
                let mut value = *mode as u8;
                if *inherit_env {
                    value |= DSMSG_LOAD_INHERIT_ENV;
                }
                value
            }
            Request::Kill { subcmd, .. } => *subcmd as u8,
            Request::Stop { subcmd } => *subcmd as u8,
            Request::MemRead { space, .. } | Request::MemWrite { space, .. } => *space as u8,
            Request::RegRead { set, .. } | Request::RegWrite { set, .. } => *set as u8,
            Request::Run(mode) => mode.subcmd(),
            Request::Break { flags, .. } => *flags,
            Request::PidList { subcmd, .. } => *subcmd as u8,
            Request::Cwd { subcmd, .. } => *subcmd as u8,
            Request::Env { subcmd, .. } => *subcmd as u8,
            _ => 0,
        }
    }

    /// Encode header and payload into one debug-channel message.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PayloadTooLarge`] when a variable-length field exceeds
    /// [`DS_DATA_MAX_SIZE`].
    pub fn encode(&self, mid: u8, endian: Endian, mode: ResponseMode) -> Result<Vec<u8>>
    {
        let spare = match mode {
            ResponseMode::Expected => 0,
            ResponseMode::Suppressed => DS_MSG_NO_RESPONSE,
        };

        let header = DsHeader::new(self.command(), self.subcmd(), mid, endian);
        let mut w = PayloadWriter::new(endian);
        w.bytes(&header.to_bytes());

        match self {
            Request::Connect { major, minor } | Request::ProtoVersion { major, minor } => {
                w.u8(*major).u8(*minor).pad(2);
            }
            Request::Disconnect => {}
            Request::Select { pid, tid, .. } | Request::PidList { pid, tid, .. } => {
                w.i32(*pid).i32(*tid);
            }
            Request::MapInfo { pid, addr, .. } => {
                w.i32(*pid).u32(*addr);
            }
            Request::Load {
                argc,
                envc,
                cmdline,
                ..
            } => {
                check_data_len(cmdline.len())?;
                w.i16(*argc).i16(*envc).bytes(cmdline);
            }
            Request::Attach { pid } | Request::Detach { pid } => {
                w.i32(*pid);
            }
            Request::Kill { signo, .. } => {
                w.i32(*signo);
            }
            Request::Stop { .. } => {}
            Request::MemRead { addr, size, .. } => {
                check_data_len(usize::from(*size))?;
                w.u32(spare).u64(*addr).u16(*size).pad(2);
            }
            Request::MemWrite { addr, data, .. } => {
                check_data_len(data.len())?;
                w.u32(spare).u64(*addr).bytes(data);
            }
            Request::RegRead { offset, size, .. } => {
                check_data_len(usize::from(*size))?;
                w.u16(*offset).u16(*size);
            }
            Request::RegWrite { offset, data, .. } => {
                check_data_len(data.len())?;
                w.u16(*offset).pad(2).bytes(data);
            }
            Request::Run(mode) => {
                let (a, b) = match *mode {
                    RunMode::Continue => (0, 0),
                    RunMode::Count(count) => (count, 0),
                    RunMode::Range { start, end } => (start, end),
                };
                w.u32(a).u32(b);
            }
            Request::Break { addr, size, .. } => {
                w.u32(*addr).i32(*size);
            }
            Request::FileOpen { mode, perms, path } => {
                check_data_len(path.len() + 1)?;
                w.i32(*mode).i32(*perms).cstr(path);
            }
            Request::FileRead { size } => {
                check_data_len(usize::from(*size))?;
                w.u16(*size).pad(2);
            }
            Request::FileWrite { data } | Request::Env { data, .. } => {
                check_data_len(data.len())?;
                w.bytes(data);
            }
            Request::FileClose { mtime } => {
                w.i32(*mtime);
            }
            Request::Cwd { path, .. } => {
                check_data_len(path.len() + 1)?;
                w.cstr(path);
            }
            Request::BaseAddress { addr } => {
                w.u32(*addr);
            }
            Request::HandleSignals { table } => {
                w.bytes(table);
            }
            Request::CpuInfo => {
                w.u32(spare);
            }
        }

        Ok(w.finish())
    }

    /// Decode a request as the agent would see it.
    ///
    /// # Errors
    ///
    /// Truncated payloads, unknown commands, or a response code in the header.
    pub fn decode(bytes: &[u8]) -> Result<(DsHeader, Self)>
    {
        let header = DsHeader::parse(bytes)?;
        let mut r = PayloadReader::new(header.endian, &bytes[HEADER_SIZE..]);
        let sub = header.subcmd;

        let request = match header.command {
            Command::Connect => {
                let major = r.u8()?;
                let minor = r.u8()?;
                Request::Connect { major, minor }
            }
            Command::Disconnect => Request::Disconnect,
            Command::Select => Request::Select {
                subcmd: SelectSubcmd::from_u8(sub)?,
                pid: r.i32()?,
                tid: r.i32()?,
            },
            Command::MapInfo => Request::MapInfo {
                flags: sub,
                pid: r.i32()?,
                addr: r.u32()?,
            },
            Command::Load => Request::Load {
                mode: LoadMode::from_u8(sub & !DSMSG_LOAD_INHERIT_ENV)?,
                inherit_env: sub & DSMSG_LOAD_INHERIT_ENV != 0,
                argc: r.i16()?,
                envc: r.i16()?,
                cmdline: r.rest().to_vec(),
            },
            Command::Attach => Request::Attach { pid: r.i32()? },
            Command::Detach => Request::Detach { pid: r.i32()? },
            Command::Kill => Request::Kill {
                subcmd: KillSubcmd::from_u8(sub)?,
                signo: r.i32()?,
            },
            Command::Stop => Request::Stop {
                subcmd: StopSubcmd::from_u8(sub)?,
            },
            Command::MemRead => {
                r.u32()?;
                Request::MemRead {
                    space: MemSubcmd::from_u8(sub)?,
                    addr: r.u64()?,
                    size: r.u16()?,
                }
            }
            Command::MemWrite => {
                r.u32()?;
                Request::MemWrite {
                    space: MemSubcmd::from_u8(sub)?,
                    addr: r.u64()?,
                    data: r.rest().to_vec(),
                }
            }
            Command::RegRead => Request::RegRead {
                set: RegSubcmd::from_u8(sub)?,
                offset: r.u16()?,
                size: r.u16()?,
            },
            Command::RegWrite => {
                let offset = r.u16()?;
                r.skip(2)?;
                Request::RegWrite {
                    set: RegSubcmd::from_u8(sub)?,
                    offset,
                    data: r.rest().to_vec(),
                }
            }
            Command::Run => {
                let a = r.u32()?;
                let b = r.u32()?;
                Request::Run(match sub {
                    0 => RunMode::Continue,
                    1 => RunMode::Count(a),
                    2 => RunMode::Range { start: a, end: b },
                    other => {
                        return Err(ProtocolError::UnexpectedResponse(format!(
                            "invalid run subcommand {other}"
                        )))
                    }
                })
            }
            Command::Break => Request::Break {
                flags: sub,
                addr: r.u32()?,
                size: r.i32()?,
            },
            Command::FileOpen => Request::FileOpen {
                mode: r.i32()?,
                perms: r.i32()?,
                path: r.cstr(),
            },
            Command::FileRead => Request::FileRead { size: r.u16()? },
            Command::FileWrite => Request::FileWrite {
                data: r.rest().to_vec(),
            },
            Command::FileClose => Request::FileClose { mtime: r.i32()? },
            Command::PidList => Request::PidList {
                subcmd: PidListSubcmd::from_u8(sub)?,
                pid: r.i32()?,
                tid: r.i32()?,
            },
            Command::Cwd => Request::Cwd {
                subcmd: CwdSubcmd::from_u8(sub)?,
                path: r.cstr(),
            },
            Command::Env => Request::Env {
                subcmd: EnvSubcmd::from_u8(sub)?,
                data: r.rest().to_vec(),
            },
            Command::BaseAddress => Request::BaseAddress { addr: r.u32()? },
            Command::ProtoVersion => {
                let major = r.u8()?;
                let minor = r.u8()?;
                Request::ProtoVersion { major, minor }
            }
            Command::HandleSignals => {
                let rest = r.rest();
                if rest.len() < QNXNTO_NSIG {
                    return Err(ProtocolError::Truncated {
                        expected: QNXNTO_NSIG,
                        actual: rest.len(),
                    });
                }
                let mut table = [0u8; QNXNTO_NSIG];
                table.copy_from_slice(&rest[..QNXNTO_NSIG]);
                Request::HandleSignals { table }
            }
            Command::CpuInfo => Request::CpuInfo,
            other => {
                return Err(ProtocolError::UnexpectedResponse(format!(
                    "{other} is not a request"
                )))
            }
        };

        Ok((header, request))
    }

    /// `true` if the request asked the agent not to reply.
    #[must_use]
    pub fn raw_suppresses_response(bytes: &[u8]) -> bool
    {
        let Ok(header) = DsHeader::parse(bytes) else {
            return false;
        };
        if !matches!(
            header.command,
            Command::MemRead | Command::MemWrite | Command::CpuInfo
        ) {
            return false;
        }
        let mut r = PayloadReader::new(header.endian, &bytes[HEADER_SIZE..]);
        r.u32().is_ok_and(|spare| spare & DS_MSG_NO_RESPONSE != 0)
    }
}

/// A host-bound reply to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response
{
    Err
    {
        errno: i32,
        reason: PdebugErrorCode,
    },
    Ok,
    OkStatus(i32),
    OkData(Vec<u8>),
}

impl Response
{
    /// Encode as the agent would send it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PayloadTooLarge`] when `okdata` exceeds [`DS_DATA_MAX_SIZE`].
    pub fn encode(&self, mid: u8, endian: Endian) -> Result<Vec<u8>>
    {
        let (command, subcmd) = match self {
            Response::Err { reason, .. } => (Command::Err, reason.as_u8()),
            Response::Ok => (Command::Ok, 0),
            Response::OkStatus(_) => (Command::OkStatus, 0),
            Response::OkData(_) => (Command::OkData, 0),
        };
        let mut w = PayloadWriter::new(endian);
        w.bytes(&DsHeader::new(command, subcmd, mid, endian).to_bytes());
        match self {
            Response::Err { errno, .. } => {
                w.i32(*errno);
            }
            Response::Ok => {}
            Response::OkStatus(status) => {
                w.i32(*status);
            }
            Response::OkData(data) => {
                check_data_len(data.len())?;
                w.bytes(data);
            }
        }
        Ok(w.finish())
    }

    /// Decode a response payload that follows an already-parsed header.
    ///
    /// # Errors
    ///
    /// `Truncated` for short payloads, `PayloadTooLarge` for oversized
    /// `okdata`, `UnexpectedResponse` if the header is not a response.
    pub fn decode(header: &DsHeader, payload: &[u8]) -> Result<Self>
    {
        let mut r = PayloadReader::new(header.endian, payload);
        match header.command {
            Command::Err => Ok(Response::Err {
                errno: r.i32()?,
                reason: PdebugErrorCode::from_u8(header.subcmd),
            }),
            Command::Ok => Ok(Response::Ok),
            Command::OkStatus => Ok(Response::OkStatus(r.i32()?)),
            Command::OkData => {
                check_data_len(payload.len())?;
                Ok(Response::OkData(payload.to_vec()))
            }
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "{other} is not a response"
            ))),
        }
    }

    /// Turn `DSrMsg_err` into an error, passing other replies through.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Target`] for an error reply.
    pub fn into_result(self) -> Result<Self>
    {
        match self {
            Response::Err { errno, reason } => Err(ProtocolError::Target { errno, reason }),
            other => Ok(other),
        }
    }
}
