//! # Platform-Specific Implementations
//!
//! Native process control only exists on QNX Neutrino, where `/proc/<pid>/as`
//! accepts the debug `devctl` requests:
//!
//! - **qnx**: `devctl` on `/proc`, `SignalKill`, stop notification via `SIGUSR1`
//!
//! On every other host [`crate::procfs::native_session`] reports
//! `UnsupportedPlatform`; the remote target and the core-file helpers work
//! everywhere.

#[cfg(target_os = "nto")]
pub mod qnx;
