//! # Error Types
//!
//! Errors raised by the register codecs, native `/proc` control, the remote
//! target, and the OS-ABI helpers.
//!
//! We use `thiserror` to derive `Error` and the display strings.
//!
//! ## Error Categories
//!
//! 1. **Transport failure**: `Io`, `Protocol` wrapping a transport error
//! 2. **Target-reported failure**: `Devctl`, `Protocol(ProtocolError::Target)`
//! 3. **Caller logic error**: `InvalidRegisterRange`, `BufferTooSmall`, `NotAttached`
//!
//! A failed devctl aborts the command that issued it but leaves the session
//! usable. Only a failed attach tears the session down.

use ntodbg_protocol::ProtocolError;
use thiserror::Error;

use crate::types::ProcessId;

/// Main error type for ntodbg-core operations
#[derive(Error, Debug)]
pub enum NtoError
{
    /// The operation needs an attached process.
    #[error("Not attached to a process")]
    NotAttached,

    /// Opening or stopping the process during attach failed.
    ///
    /// This is the one failure that leaves no session behind.
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed
    {
        /// Process we tried to attach to
        pid: ProcessId,
        /// What went wrong
        reason: String,
    },

    /// A `/proc` device-control request failed.
    #[error("{request} failed: {source}")]
    Devctl
    {
        /// Name of the `DCMD_PROC_*` request
        request: &'static str,
        /// The errno reported by the kernel
        #[source]
        source: std::io::Error,
    },

    /// Error from the pdebug wire protocol (transport or target-reported).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A register range with `first > last`.
    #[error("Invalid register range {first}..={last}")]
    InvalidRegisterRange
    {
        /// First register number requested
        first: usize,
        /// Last register number requested
        last: usize,
    },

    /// A wire buffer is smaller than the register block it must hold.
    #[error("Buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall
    {
        /// Bytes required
        needed: usize,
        /// Bytes provided
        actual: usize,
    },

    /// Malformed or unreadable ELF input.
    #[error("ELF error: {0}")]
    Elf(String),

    /// No register codec exists for the CPU.
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Native process control is only available on QNX hosts.
    #[error("Native /proc control is not supported on this host")]
    UnsupportedPlatform,

    /// The user abandoned a wait on the target.
    #[error("Interrupted by user")]
    Interrupted,

    /// An invariant that should never break did.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (core files, the control fd, solib lookup)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<object::Error> for NtoError
{
    fn from(err: object::Error) -> Self
    {
        NtoError::Elf(err.to_string())
    }
}

/// Convenience type alias for `Result<T, NtoError>`
///
/// ```rust
/// use ntodbg_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, NtoError>;
