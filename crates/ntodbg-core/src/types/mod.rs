//! # Types
//!
//! Target-neutral value types shared by the native and remote backends.

pub mod address;
pub mod process;

pub use address::Address;
pub use process::{ProcessId, ThreadId, ThreadInfo, ThreadState, WaitStatus};
