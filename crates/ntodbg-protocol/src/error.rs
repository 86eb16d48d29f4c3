//! # Protocol Errors
//!
//! Everything that can go wrong between the host and the pdebug agent.
//!
//! We keep three families apart so callers can react differently:
//!
//! 1. **Transport**: `Io`, `Timeout`, `Disconnected`, `TooManyRetries`
//! 2. **Malformed traffic**: `Checksum`, `Truncated`, `UnknownCommand`, `UnexpectedResponse`
//! 3. **Target-reported failure**: `Target` (a `DSrMsg_err` reply)
//!
//! `PayloadTooLarge` is a host-side misuse: the caller tried to put more than
//! `DS_DATA_MAX_SIZE` bytes into one message.

use thiserror::Error;

use crate::messages::PdebugErrorCode;

/// Error type for the pdebug wire protocol
#[derive(Error, Debug)]
pub enum ProtocolError
{
    /// The underlying byte stream failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete frame arrived before the read timeout expired.
    #[error("timed out waiting for the target agent")]
    Timeout,

    /// The stream reached end-of-file.
    #[error("connection to the target agent was closed")]
    Disconnected,

    /// A received frame failed its checksum.
    #[error("bad frame checksum (sum 0x{sum:02x})")]
    Checksum
    {
        /// Sum of all frame bytes including the checksum (should be `0xff`).
        sum: u8,
    },

    /// A frame ran past the longest legal message without a closing frame character.
    #[error("frame longer than {limit} bytes")]
    FrameTooLong
    {
        /// Longest accepted unescaped frame.
        limit: usize,
    },

    /// The agent kept NAKing (or we kept NAKing it) past the retry budget.
    #[error("gave up after {0} transmission attempts")]
    TooManyRetries(u32),

    /// A message was shorter than its fixed layout requires.
    #[error("truncated message: expected at least {expected} bytes, got {actual}")]
    Truncated
    {
        /// Minimum length required by the layout.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// The command byte does not name any known message.
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// The caller tried to send more than `DS_DATA_MAX_SIZE` bytes of payload.
    #[error("payload of {len} bytes exceeds DS_DATA_MAX_SIZE")]
    PayloadTooLarge
    {
        /// Requested payload length.
        len: usize,
    },

    /// The agent answered with `DSrMsg_err`.
    #[error("target error: errno {errno} ({reason})")]
    Target
    {
        /// `errno`-style error code reported by the agent.
        errno: i32,
        /// Secondary pdebug reason.
        reason: PdebugErrorCode,
    },

    /// The reply did not fit the request (e.g. `okdata` where a status was expected).
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
