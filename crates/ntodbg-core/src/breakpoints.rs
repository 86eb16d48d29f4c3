//! Breakpoint and watchpoint bookkeeping.
//!
//! Neutrino plants traps itself: both `/proc` (`DCMD_PROC_BREAK`) and pdebug
//! (`DStMsg_brk`) take a `{type, addr, size}` triple and the kernel does the
//! rest. Backends use [`BreakpointStore`] to remember what they installed so
//! they can remove it again, report hits, and clean up on detach.
//!
//! ## The `size` field
//!
//! | request | size |
//! |---|---|
//! | insert execution breakpoint | `0` |
//! | insert watchpoint | watched length in bytes |
//! | remove anything | `-1` |

use std::collections::HashMap;
use std::fmt;

use ntodbg_protocol::messages::brk;

use crate::types::Address;

/// `size` value that removes a breakpoint.
pub const BREAK_REMOVE_SIZE: i32 = -1;

/// Unique identifier for an installed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u32);

impl BreakpointId
{
    #[must_use]
    pub const fn from_raw(value: u32) -> Self
    {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// Access that triggers a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind
{
    Read,
    ReadWrite,
    /// Stop only when a write changes the value.
    Modify,
}

/// What an entry traps on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind
{
    /// Execution breakpoint planted by the kernel.
    Software,
    /// Execution breakpoint in a debug register.
    Hardware,
    Watch(WatchKind),
}

impl BreakpointKind
{
    /// The `_DEBUG_BREAK_*` / `DSMSG_BRK_*` type bits.
    ///
    /// Watchpoints always carry the hardware bit; there is no software
    /// watchpoint support on either backend.
    #[must_use]
    pub const fn break_type(self) -> u8
    {
        match self {
            BreakpointKind::Software => brk::EXEC,
            BreakpointKind::Hardware => brk::EXEC | brk::HW,
            BreakpointKind::Watch(WatchKind::Read) => brk::RD | brk::HW,
            BreakpointKind::Watch(WatchKind::ReadWrite) => brk::RW | brk::HW,
            BreakpointKind::Watch(WatchKind::Modify) => brk::MODIFY | brk::HW,
        }
    }

    /// Type bits used when removing; the kernel ignores the access kind.
    #[must_use]
    pub const fn remove_type(self) -> u8
    {
        match self {
            BreakpointKind::Software | BreakpointKind::Hardware => self.break_type(),
            BreakpointKind::Watch(_) => brk::RW,
        }
    }

    #[must_use]
    pub const fn is_watchpoint(self) -> bool
    {
        matches!(self, BreakpointKind::Watch(_))
    }
}

/// One `{type, addr, size}` request for the kernel or the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakRequest
{
    pub break_type: u8,
    pub address: Address,
    pub size: i32,
}

impl BreakRequest
{
    /// Request installing a breakpoint of `kind` covering `length` bytes.
    #[must_use]
    pub fn insert(kind: BreakpointKind, address: Address, length: u32) -> Self
    {
        let size = if kind.is_watchpoint() {
            i32::try_from(length).unwrap_or(i32::MAX)
        } else {
            0
        };
        Self {
            break_type: kind.break_type(),
            address,
            size,
        }
    }

    #[must_use]
    pub const fn remove(kind: BreakpointKind, address: Address) -> Self
    {
        Self {
            break_type: kind.remove_type(),
            address,
            size: BREAK_REMOVE_SIZE,
        }
    }
}

/// Public information about a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo
{
    pub id: BreakpointId,
    pub address: Address,
    pub kind: BreakpointKind,
    /// Watched length; `0` for execution breakpoints.
    pub length: u32,
    pub hit_count: u64,
}

/// Installed breakpoints of one session.
#[derive(Debug, Default)]
pub struct BreakpointStore
{
    next_id: u32,
    by_id: HashMap<BreakpointId, BreakpointInfo>,
    by_site: HashMap<(Address, BreakpointKind), BreakpointId>,
}

impl BreakpointStore
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Record a breakpoint the backend has just installed.
    ///
    /// A second insert at the same site and kind returns the existing id.
    pub fn insert(&mut self, address: Address, kind: BreakpointKind, length: u32) -> BreakpointId
    {
        if let Some(id) = self.by_site.get(&(address, kind)) {
            return *id;
        }
        let id = self.allocate_id();
        self.by_site.insert((address, kind), id);
        self.by_id.insert(
            id,
            BreakpointInfo {
                id,
                address,
                kind,
                length: if kind.is_watchpoint() { length } else { 0 },
                hit_count: 0,
            },
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&BreakpointInfo>
    {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn id_at(&self, address: Address, kind: BreakpointKind) -> Option<BreakpointId>
    {
        self.by_site.get(&(address, kind)).copied()
    }

    pub fn remove(&mut self, id: BreakpointId) -> Option<BreakpointInfo>
    {
        let info = self.by_id.remove(&id)?;
        self.by_site.remove(&(info.address, info.kind));
        Some(info)
    }

    /// Breakpoints ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        let mut all: Vec<_> = self.by_id.values().cloned().collect();
        all.sort_by_key(|info| info.id);
        all
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.by_id.is_empty()
    }

    /// Count a hit on the execution breakpoint at `address`, if any.
    pub fn record_hit(&mut self, address: Address) -> Option<BreakpointInfo>
    {
        let id = self
            .id_at(address, BreakpointKind::Software)
            .or_else(|| self.id_at(address, BreakpointKind::Hardware))?;
        let info = self.by_id.get_mut(&id)?;
        info.hit_count = info.hit_count.saturating_add(1);
        Some(info.clone())
    }

    /// Count a hit on the watchpoint covering `data_address`, if any.
    pub fn record_watch_hit(&mut self, data_address: Address) -> Option<BreakpointInfo>
    {
        let info = self.by_id.values_mut().find(|info| {
            info.kind.is_watchpoint()
                && data_address >= info.address
                && data_address.value() < info.address.value() + u64::from(info.length.max(1))
        })?;
        info.hit_count = info.hit_count.saturating_add(1);
        Some(info.clone())
    }

    /// Forget everything, returning what was installed.
    pub fn drain(&mut self) -> Vec<BreakpointInfo>
    {
        self.by_site.clear();
        let mut all: Vec<_> = self.by_id.drain().map(|(_, info)| info).collect();
        all.sort_by_key(|info| info.id);
        all
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_break_type_bits()
    {
        assert_eq!(BreakpointKind::Software.break_type(), 0x01);
        assert_eq!(BreakpointKind::Hardware.break_type(), 0x11);
        assert_eq!(BreakpointKind::Watch(WatchKind::Read).break_type(), 0x12);
        assert_eq!(BreakpointKind::Watch(WatchKind::ReadWrite).break_type(), 0x16);
        assert_eq!(BreakpointKind::Watch(WatchKind::Modify).break_type(), 0x18);
        assert_eq!(BreakpointKind::Watch(WatchKind::Modify).break_type(), brk::MODIFY | brk::HW);
    }

    #[test]
    fn test_requests()
    {
        let at = Address::new(0x0804_8000);
        assert_eq!(BreakRequest::insert(BreakpointKind::Software, at, 4).size, 0);
        assert_eq!(BreakRequest::insert(BreakpointKind::Watch(WatchKind::Read), at, 4).size, 4);
        let remove = BreakRequest::remove(BreakpointKind::Watch(WatchKind::Read), at);
        assert_eq!(remove.size, BREAK_REMOVE_SIZE);
        assert_eq!(remove.break_type, brk::RW);
    }

    #[test]
    fn test_store_lifecycle()
    {
        let mut store = BreakpointStore::new();
        let at = Address::new(0x1000);
        let id = store.insert(at, BreakpointKind::Software, 0);
        assert_eq!(store.insert(at, BreakpointKind::Software, 0), id);
        assert_eq!(store.len(), 1);

        assert_eq!(store.record_hit(at).map(|i| i.hit_count), Some(1));
        assert!(store.record_hit(Address::new(0x2000)).is_none());

        let watch = store.insert(Address::new(0x5000), BreakpointKind::Watch(WatchKind::ReadWrite), 8);
        assert_eq!(store.record_watch_hit(Address::new(0x5004)).map(|i| i.id), Some(watch));
        assert!(store.record_watch_hit(Address::new(0x5008)).is_none());

        assert!(store.remove(id).is_some());
        assert!(store.id_at(at, BreakpointKind::Software).is_none());
        assert_eq!(store.drain().len(), 1);
        assert!(store.is_empty());
    }
}
