//! # ntodbg-core
//!
//! Debugging primitives for QNX Neutrino targets.
//!
//! This crate provides:
//! - Register codecs that move the debugger's register file to and from the
//!   target's wire blocks, one per CPU (ARM, MIPS, PPC, x86, SH)
//! - Native process control through `devctl` on `/proc/<pid>/as`
//! - A remote target speaking the pdebug protocol
//! - Link-map relocation and the Neutrino OS ABI helpers (core notes,
//!   auxiliary vector, shared-object search)
//!
//! ## Platform Support
//!
//! - **QNX Neutrino**: native and remote control
//! - **Everything else**: remote control and the offline helpers; the native
//!   entry point reports [`NtoError::UnsupportedPlatform`]
//!
//! ## Why unsafe code is needed
//!
//! The native backend calls `devctl`, `SignalKill` and friends through FFI.
//! Those calls live in [`platform`] and are wrapped in safe functions.

#![allow(unsafe_code)] // Required for the Neutrino devctl FFI

pub mod arch;
pub mod breakpoints;
pub mod error;
pub mod linkmap;
pub mod nto;
pub mod platform;
pub mod prelude;
pub mod procfs;
pub mod regcache;
pub mod remote;
pub mod signals;
pub mod target;
pub mod types;

pub use arch::{Architecture, RegisterCodec};
pub use error::{NtoError, Result};
pub use target::{MemoryAccess, StopEvent, Target};
pub use types::{Address, ProcessId, ThreadId};
