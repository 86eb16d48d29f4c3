//! Common module for library exports

pub use crate::arch::{Architecture, RegisterCodec, RegisterNumber, RegisterSet, WireArea};
pub use crate::breakpoints::{BreakpointId, BreakpointKind};
pub use crate::error::{NtoError, Result};
pub use crate::procfs::{native_session, ProcfsConfig, ProcfsSession};
pub use crate::remote::RemoteTarget;
pub use crate::signals::{SignalTable, TargetSignal};
pub use crate::target::{MemoryAccess, StopEvent, Target};
pub use crate::types::{Address, ProcessId, ThreadId, ThreadInfo, ThreadState, WaitStatus};
