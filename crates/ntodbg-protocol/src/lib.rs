//! # ntodbg-protocol
//!
//! The binary protocol spoken between a host debugger and `pdebug`, the
//! debug agent resident on a QNX Neutrino target.
//!
//! ## Layers
//!
//! - [`frame`]: byte stuffing and checksums on the raw stream
//! - [`header`]: the 4-byte `DShdr`, command codes, channels, endianness
//! - [`messages`]: request and response payloads, subcommands, error reasons
//! - [`notify`]: asynchronous `DShMsg_notify` events
//! - [`text`]: console I/O on the text channel
//! - [`client`]: the host-side request/response state machine
//!
//! ## Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use ntodbg_protocol::{Endian, PdebugClient};
//!
//! let stream = TcpStream::connect("10.0.0.2:8000")?;
//! let mut client = PdebugClient::new(stream, Endian::Little);
//! client.connect()?;
//! let (major, minor) = client.protocol_version()?;
//! println!("pdebug protocol {major}.{minor}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod messages;
pub mod notify;
pub mod text;

pub use client::PdebugClient;
pub use error::{ProtocolError, Result};
pub use header::{Channel, Command, DsHeader, Endian};
pub use messages::{
    PdebugErrorCode, RegSubcmd, Request, Response, ResponseMode, DS_DATA_MAX_SIZE, QNXNTO_NSIG,
};
pub use notify::{Notification, NotifyEvent, NotifyKind};
