//! Asynchronous host-bound notifications (`DShMsg_notify`).
//!
//! A notification may arrive at any time on the debug channel, including
//! while the host waits for the reply to an unrelated request. The payload is
//! `{pid, tid}` followed by a union selected by the subcommand byte.

use crate::codec::{PayloadReader, PayloadWriter};
use crate::error::{ProtocolError, Result};
use crate::header::{Command, DsHeader, Endian};

/// `DSMSG_NOTIFY_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NotifyKind
{
    PidLoad = 0,
    TidLoad = 1,
    DllLoad = 2,
    PidUnload = 3,
    TidUnload = 4,
    DllUnload = 5,
    Brk = 6,
    Step = 7,
    SigEv = 8,
    Stopped = 9,
}

impl NotifyKind
{
    /// # Errors
    ///
    /// [`ProtocolError::UnexpectedResponse`] for an unknown subtype.
    pub fn from_u8(value: u8) -> Result<Self>
    {
        Ok(match value {
            0 => Self::PidLoad,
            1 => Self::TidLoad,
            2 => Self::DllLoad,
            3 => Self::PidUnload,
            4 => Self::TidUnload,
            5 => Self::DllUnload,
            6 => Self::Brk,
            7 => Self::Step,
            8 => Self::SigEv,
            9 => Self::Stopped,
            other => {
                return Err(ProtocolError::UnexpectedResponse(format!(
                    "unknown notification subtype {other}"
                )))
            }
        })
    }
}

/// Subtype-specific notification data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent
{
    /// A new process image was loaded.
    PidLoad
    {
        codeoff: u32,
        dataoff: u32,
        ostype: u16,
        cputype: u16,
        cpuid: u32,
        name: String,
    },
    TidLoad,
    TidUnload,
    /// The process went away; `faulted` is set when it died on a signal.
    PidUnload
    {
        status: i32,
        faulted: bool,
    },
    DllLoad
    {
        name: String,
    },
    DllUnload
    {
        name: String,
    },
    /// A breakpoint or watchpoint fired.
    Brk
    {
        ip: u32,
        dp: u32,
        flags: u32,
    },
    /// A single-step completed.
    Step
    {
        ip: u32,
        lastip: u32,
    },
    /// A signal was delivered to the inferior.
    SigEv
    {
        signo: i32,
        code: i32,
        value: i32,
    },
    Stopped,
}

impl NotifyEvent
{
    #[must_use]
    pub const fn kind(&self) -> NotifyKind
    {
        match self {
            NotifyEvent::PidLoad { .. } => NotifyKind::PidLoad,
            NotifyEvent::TidLoad => NotifyKind::TidLoad,
            NotifyEvent::TidUnload => NotifyKind::TidUnload,
            NotifyEvent::PidUnload { .. } => NotifyKind::PidUnload,
            NotifyEvent::DllLoad { .. } => NotifyKind::DllLoad,
            NotifyEvent::DllUnload { .. } => NotifyKind::DllUnload,
            NotifyEvent::Brk { .. } => NotifyKind::Brk,
            NotifyEvent::Step { .. } => NotifyKind::Step,
            NotifyEvent::SigEv { .. } => NotifyKind::SigEv,
            NotifyEvent::Stopped => NotifyKind::Stopped,
        }
    }
}

/// A decoded `DShMsg_notify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification
{
    /// Message id; echoed back in the acknowledgement.
    pub mid: u8,
    pub pid: i32,
    pub tid: i32,
    pub event: NotifyEvent,
}

impl Notification
{
    /// Decode the payload following a notify header.
    ///
    /// # Errors
    ///
    /// Truncated payloads or an unknown subtype.
    pub fn decode(header: &DsHeader, payload: &[u8]) -> Result<Self>
    {
        let mut r = PayloadReader::new(header.endian, payload);
        let pid = r.i32()?;
        let tid = r.i32()?;

        let event = match NotifyKind::from_u8(header.subcmd)? {
            NotifyKind::PidLoad => NotifyEvent::PidLoad {
                codeoff: r.u32()?,
                dataoff: r.u32()?,
                ostype: r.u16()?,
                cputype: r.u16()?,
                cpuid: r.u32()?,
                name: r.cstr(),
            },
            NotifyKind::TidLoad => NotifyEvent::TidLoad,
            NotifyKind::TidUnload => NotifyEvent::TidUnload,
            NotifyKind::PidUnload => {
                let status = r.i32()?;
                // Older agents omit the faulted byte.
                let faulted = r.u8().map(|b| b != 0).unwrap_or(false);
                NotifyEvent::PidUnload { status, faulted }
            }
            NotifyKind::DllLoad => NotifyEvent::DllLoad { name: r.cstr() },
            NotifyKind::DllUnload => NotifyEvent::DllUnload { name: r.cstr() },
            NotifyKind::Brk => NotifyEvent::Brk {
                ip: r.u32()?,
                dp: r.u32()?,
                flags: r.u32()?,
            },
            NotifyKind::Step => NotifyEvent::Step {
                ip: r.u32()?,
                lastip: r.u32()?,
            },
            NotifyKind::SigEv => NotifyEvent::SigEv {
                signo: r.i32()?,
                code: r.i32()?,
                value: r.i32()?,
            },
            NotifyKind::Stopped => NotifyEvent::Stopped,
        };

        Ok(Self {
            mid: header.mid,
            pid,
            tid,
            event,
        })
    }

    /// Encode as the agent would send it.
    #[must_use]
    pub fn encode(&self, endian: Endian) -> Vec<u8>
    {
        let header = DsHeader::new(Command::Notify, self.event.kind() as u8, self.mid, endian);
        let mut w = PayloadWriter::new(endian);
        w.bytes(&header.to_bytes()).i32(self.pid).i32(self.tid);
        match &self.event {
            NotifyEvent::PidLoad {
                codeoff,
                dataoff,
                ostype,
                cputype,
                cpuid,
                name,
            } => {
                w.u32(*codeoff)
                    .u32(*dataoff)
                    .u16(*ostype)
                    .u16(*cputype)
                    .u32(*cpuid)
                    .cstr(name);
            }
            NotifyEvent::PidUnload { status, faulted } => {
                w.i32(*status).u8(u8::from(*faulted)).pad(3);
            }
            NotifyEvent::DllLoad { name } | NotifyEvent::DllUnload { name } => {
                w.cstr(name);
            }
            NotifyEvent::Brk { ip, dp, flags } => {
                w.u32(*ip).u32(*dp).u32(*flags);
            }
            NotifyEvent::Step { ip, lastip } => {
                w.u32(*ip).u32(*lastip);
            }
            NotifyEvent::SigEv { signo, code, value } => {
                w.i32(*signo).i32(*code).i32(*value);
            }
            NotifyEvent::TidLoad | NotifyEvent::TidUnload | NotifyEvent::Stopped => {}
        }
        w.finish()
    }
}
