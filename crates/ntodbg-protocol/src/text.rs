//! Console text sub-channel (`TShdr`).

use crate::error::{ProtocolError, Result};
use crate::header::{Channel, HEADER_SIZE};

/// `TSMsg_*` command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextCommand
{
    Text = 0,
    Done = 1,
    Start = 2,
    Stop = 3,
    Ack = 4,
}

impl TextCommand
{
    /// # Errors
    ///
    /// [`ProtocolError::UnknownCommand`] for codes above 4.
    pub fn from_u8(value: u8) -> Result<Self>
    {
        Ok(match value {
            0 => Self::Text,
            1 => Self::Done,
            2 => Self::Start,
            3 => Self::Stop,
            4 => Self::Ack,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

/// A text-channel message: `{cmd, console, spare, channel}` plus data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage
{
    pub command: TextCommand,
    pub console: u8,
    pub data: Vec<u8>,
}

impl TextMessage
{
    #[must_use]
    pub fn text(console: u8, data: &[u8]) -> Self
    {
        Self {
            command: TextCommand::Text,
            console,
            data: data.to_vec(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.data.len());
        out.extend_from_slice(&[self.command as u8, self.console, 0, Channel::Text.as_u8()]);
        out.extend_from_slice(&self.data);
        out
    }

    /// # Errors
    ///
    /// `Truncated` or `UnknownCommand`.
    pub fn decode(bytes: &[u8]) -> Result<Self>
    {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            command: TextCommand::from_u8(bytes[0])?,
            console: bytes[1],
            data: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_text_header_layout()
    {
        let bytes = TextMessage::text(1, b"hi\n").encode();
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
        assert_eq!(TextMessage::decode(&bytes).unwrap().data, b"hi\n");
    }
}
