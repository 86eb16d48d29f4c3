//! Message headers, command codes, and channel selectors.
//!
//! Every debug-channel message starts with the same four bytes:
//!
//! ```text
//! +-----+--------+-----+---------+
//! | cmd | subcmd | mid | channel |
//! +-----+--------+-----+---------+
//! ```
//!
//! The top bit of `cmd` (`DSHDR_MSG_BIG_ENDIAN`) tells the receiver in which
//! byte order the sender encoded the multi-byte payload fields.

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Size of `DShdr` / `TShdr` on the wire.
pub const HEADER_SIZE: usize = 4;

/// Set in `cmd` when the payload is big-endian.
pub const DSHDR_MSG_BIG_ENDIAN: u8 = 0x80;

/// Byte order of multi-byte payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian
{
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian
{
    /// Byte order signalled by a raw `cmd` byte.
    #[must_use]
    pub const fn from_cmd_byte(cmd: u8) -> Self
    {
        if cmd & DSHDR_MSG_BIG_ENDIAN != 0 {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Returns `true` for [`Endian::Big`].
    #[must_use]
    pub const fn is_big(self) -> bool
    {
        matches!(self, Endian::Big)
    }

    /// Byte order of the machine this code runs on.
    #[must_use]
    pub const fn native() -> Self
    {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// Logical sub-protocol selected on the shared framed transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel
{
    /// Resets message ids and protocol state.
    Reset,
    /// Debug requests, responses, and notifications.
    Debug,
    /// Console text to and from the inferior.
    Text,
    /// Negative acknowledgement; ask the peer to retransmit.
    Nak,
}

impl Channel
{
    /// Wire value of the channel selector.
    #[must_use]
    pub const fn as_u8(self) -> u8
    {
        match self {
            Channel::Reset => 0,
            Channel::Debug => 1,
            Channel::Text => 2,
            Channel::Nak => 0xff,
        }
    }

    /// Parse a channel selector byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self>
    {
        match value {
            0 => Some(Channel::Reset),
            1 => Some(Channel::Debug),
            2 => Some(Channel::Text),
            0xff => Some(Channel::Nak),
            _ => None,
        }
    }
}

/// Command codes carried in the low seven bits of `cmd`.
///
/// Codes 0-25 travel to the target, 32-35 are the generic responses, and 64 is
/// the asynchronous host-bound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command
{
    Connect = 0,
    Disconnect = 1,
    Select = 2,
    MapInfo = 3,
    Load = 4,
    Attach = 5,
    Detach = 6,
    Kill = 7,
    Stop = 8,
    MemRead = 9,
    MemWrite = 10,
    RegRead = 11,
    RegWrite = 12,
    Run = 13,
    Break = 14,
    FileOpen = 15,
    FileRead = 16,
    FileWrite = 17,
    FileClose = 18,
    PidList = 19,
    Cwd = 20,
    Env = 21,
    BaseAddress = 22,
    ProtoVersion = 23,
    HandleSignals = 24,
    CpuInfo = 25,
    Err = 32,
    Ok = 33,
    OkStatus = 34,
    OkData = 35,
    Notify = 64,
}

impl Command
{
    /// Decode the command from a raw `cmd` byte, ignoring the endian bit.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownCommand`] for codes that name no message.
    pub fn from_cmd_byte(cmd: u8) -> Result<Self>
    {
        let code = cmd & !DSHDR_MSG_BIG_ENDIAN;
        let command = match code {
            0 => Command::Connect,
            1 => Command::Disconnect,
            2 => Command::Select,
            3 => Command::MapInfo,
            4 => Command::Load,
            5 => Command::Attach,
            6 => Command::Detach,
            7 => Command::Kill,
            8 => Command::Stop,
            9 => Command::MemRead,
            10 => Command::MemWrite,
            11 => Command::RegRead,
            12 => Command::RegWrite,
            13 => Command::Run,
            14 => Command::Break,
            15 => Command::FileOpen,
            16 => Command::FileRead,
            17 => Command::FileWrite,
            18 => Command::FileClose,
            19 => Command::PidList,
            20 => Command::Cwd,
            21 => Command::Env,
            22 => Command::BaseAddress,
            23 => Command::ProtoVersion,
            24 => Command::HandleSignals,
            25 => Command::CpuInfo,
            32 => Command::Err,
            33 => Command::Ok,
            34 => Command::OkStatus,
            35 => Command::OkData,
            64 => Command::Notify,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(command)
    }

    /// Numeric code without the endian bit.
    #[must_use]
    pub const fn code(self) -> u8
    {
        self as u8
    }

    /// `true` for the target-bound request range (0-31).
    #[must_use]
    pub const fn is_request(self) -> bool
    {
        (self as u8) < 32
    }

    /// `true` for `err`/`ok`/`okstatus`/`okdata`.
    #[must_use]
    pub const fn is_response(self) -> bool
    {
        let code = self as u8;
        code >= 32 && code < 64
    }
}

impl fmt::Display for Command
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Command::Connect => "DStMsg_connect",
            Command::Disconnect => "DStMsg_disconnect",
            Command::Select => "DStMsg_select",
            Command::MapInfo => "DStMsg_mapinfo",
            Command::Load => "DStMsg_load",
            Command::Attach => "DStMsg_attach",
            Command::Detach => "DStMsg_detach",
            Command::Kill => "DStMsg_kill",
            Command::Stop => "DStMsg_stop",
            Command::MemRead => "DStMsg_memrd",
            Command::MemWrite => "DStMsg_memwr",
            Command::RegRead => "DStMsg_regrd",
            Command::RegWrite => "DStMsg_regwr",
            Command::Run => "DStMsg_run",
            Command::Break => "DStMsg_brk",
            Command::FileOpen => "DStMsg_fileopen",
            Command::FileRead => "DStMsg_filerd",
            Command::FileWrite => "DStMsg_filewr",
            Command::FileClose => "DStMsg_fileclose",
            Command::PidList => "DStMsg_pidlist",
            Command::Cwd => "DStMsg_cwd",
            Command::Env => "DStMsg_env",
            Command::BaseAddress => "DStMsg_base_address",
            Command::ProtoVersion => "DStMsg_protover",
            Command::HandleSignals => "DStMsg_handlesig",
            Command::CpuInfo => "DStMsg_cpuinfo",
            Command::Err => "DSrMsg_err",
            Command::Ok => "DSrMsg_ok",
            Command::OkStatus => "DSrMsg_okstatus",
            Command::OkData => "DSrMsg_okdata",
            Command::Notify => "DShMsg_notify",
        };
        f.write_str(name)
    }
}

/// The common 4-byte debug-channel header (`DShdr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsHeader
{
    /// Message kind.
    pub command: Command,
    /// Command-specific subcommand.
    pub subcmd: u8,
    /// Message id used to pair requests with replies.
    pub mid: u8,
    /// Channel the message travels on.
    pub channel: u8,
    /// Byte order of the payload that follows.
    pub endian: Endian,
}

impl DsHeader
{
    /// Build a debug-channel header.
    #[must_use]
    pub const fn new(command: Command, subcmd: u8, mid: u8, endian: Endian) -> Self
    {
        Self {
            command,
            subcmd,
            mid,
            channel: Channel::Debug.as_u8(),
            endian,
        }
    }

    /// Encode the header, setting the endian bit as required.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE]
    {
        let mut cmd = self.command.code();
        if self.endian.is_big() {
            cmd |= DSHDR_MSG_BIG_ENDIAN;
        }
        [cmd, self.subcmd, self.mid, self.channel]
    }

    /// Decode the first four bytes of a message.
    ///
    /// # Errors
    ///
    /// `Truncated` for short input, `UnknownCommand` for an unknown code.
    pub fn parse(bytes: &[u8]) -> Result<Self>
    {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            command: Command::from_cmd_byte(bytes[0])?,
            subcmd: bytes[1],
            mid: bytes[2],
            channel: bytes[3],
            endian: Endian::from_cmd_byte(bytes[0]),
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_endian_bit_survives_header_encoding()
    {
        let header = DsHeader::new(Command::MemRead, 0, 7, Endian::Big);
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 9 | DSHDR_MSG_BIG_ENDIAN);
        let parsed = DsHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_unknown_command_rejected()
    {
        assert!(matches!(
            Command::from_cmd_byte(30),
            Err(ProtocolError::UnknownCommand(30))
        ));
    }

    #[test]
    fn test_command_ranges()
    {
        assert!(Command::CpuInfo.is_request());
        assert!(!Command::CpuInfo.is_response());
        assert!(Command::OkData.is_response());
        assert!(!Command::Notify.is_response());
        assert!(!Command::Notify.is_request());
    }

    #[test]
    fn test_channel_round_trip()
    {
        for channel in [Channel::Reset, Channel::Debug, Channel::Text, Channel::Nak] {
            assert_eq!(Channel::from_u8(channel.as_u8()), Some(channel));
        }
        assert_eq!(Channel::from_u8(3), None);
    }
}
