//! # Link Map Relocation
//!
//! Shared objects on Neutrino are described by the runtime linker's
//! `r_debug`/`link_map` chain. The chain records an `l_addr` per object, but
//! on QNX that value is not the plain SVR4 load bias: it has to be corrected
//! by the link-time address of the object's first executable `PT_LOAD`
//! segment before it can be applied to section addresses.
//!
//! ## Layout
//!
//! [`fetch_link_map_offsets`] describes where the interesting fields live for
//! a given pointer width. The description is built once per width and shared.
//!
//! ## Relocating
//!
//! ```text
//! bias    = l_addr - p_vaddr(first PT_LOAD with PF_X)
//! start'  = (start + bias) & ptr_mask
//! end'    = (end   + bias) & ptr_mask
//! ```

use std::collections::HashSet;

use ntodbg_protocol::Endian;
use object::elf::{PF_X, PT_LOAD};
use object::read::elf::{ElfFile, ElfFile32, ElfFile64, FileHeader, ProgramHeader};
use object::{Endianness, FileKind, Object, ObjectSection};
use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::error::{NtoError, Result};
use crate::target::MemoryAccess;
use crate::types::Address;

/// Longest shared-object name read from target memory.
pub const MAX_SONAME: usize = 512;

/// Objects followed before the walk gives up on a chain that never ends.
const MAX_LINK_MAP_ENTRIES: usize = 4096;

/// Field offsets within `struct r_debug` and `struct link_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkMapOffsets
{
    pub r_version_size: usize,
    pub r_map_offset: usize,
    pub r_brk_offset: usize,
    pub r_ldsomap_offset: usize,
    pub link_map_size: usize,
    pub l_addr_offset: usize,
    pub l_name_offset: usize,
    pub l_ld_offset: usize,
    pub l_next_offset: usize,
    pub l_prev_offset: usize,
    /// Width of every pointer-sized field.
    pub ptr_size: usize,
}

impl LinkMapOffsets
{
    const fn for_width(ptr_size: usize) -> Self
    {
        let p = ptr_size;
        Self {
            r_version_size: 4,
            r_map_offset: p,
            r_brk_offset: 2 * p,
            r_ldsomap_offset: 5 * p,
            link_map_size: 5 * p,
            l_addr_offset: 0,
            l_name_offset: p,
            l_ld_offset: 2 * p,
            l_next_offset: 3 * p,
            l_prev_offset: 4 * p,
            ptr_size: p,
        }
    }
}

static ILP32_OFFSETS: OnceCell<LinkMapOffsets> = OnceCell::new();
static LP64_OFFSETS: OnceCell<LinkMapOffsets> = OnceCell::new();

/// Link-map layout for targets whose pointers are `ptr_size` bytes wide.
///
/// Anything other than 8 is treated as the 32-bit layout.
pub fn fetch_link_map_offsets(ptr_size: usize) -> &'static LinkMapOffsets
{
    if ptr_size == 8 {
        LP64_OFFSETS.get_or_init(|| LinkMapOffsets::for_width(8))
    } else {
        ILP32_OFFSETS.get_or_init(|| LinkMapOffsets::for_width(4))
    }
}

/// One `struct link_map` read from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMapEntry
{
    /// Where the structure itself lives in target memory.
    pub address: Address,
    /// `l_addr` as recorded by the runtime linker.
    pub l_addr: Address,
    /// `l_ld`, the object's dynamic section.
    pub l_ld: Address,
    /// Path the object was loaded from; empty for the main executable.
    pub name: String,
}

/// A section's address range, before or after relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRange
{
    pub name: String,
    pub start: Address,
    pub end: Address,
}

/// Read a NUL-terminated string of at most `max` bytes.
///
/// A read that comes back short ends the string where the data ran out.
pub fn read_c_string<M: MemoryAccess + ?Sized>(mem: &mut M, addr: Address, max: usize) -> Result<String>
{
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 64];
    while bytes.len() < max {
        let want = chunk.len().min(max - bytes.len());
        let Some(at) = addr.checked_add(bytes.len() as u64) else { break };
        let got = mem.read_memory(at, &mut chunk[..want])?;
        if let Some(nul) = chunk[..got].iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&chunk[..nul]);
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.extend_from_slice(&chunk[..got]);
        if got < want {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Follow the `link_map` chain hanging off the `r_debug` at `r_debug`.
///
/// The walk stops at a null `l_next`, at an entry already visited, or after
/// an unreasonable number of entries.
///
/// # Errors
///
/// Memory that cannot be read where the structures should be.
pub fn walk_link_map<M: MemoryAccess + ?Sized>(
    mem: &mut M,
    r_debug: Address,
    ptr_size: usize,
    endian: Endian,
) -> Result<Vec<LinkMapEntry>>
{
    let lmo = fetch_link_map_offsets(ptr_size);
    let mut lm = mem.read_pointer(r_debug + lmo.r_map_offset as u64, ptr_size, endian)?;
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    while lm != Address::ZERO {
        if !seen.insert(lm) {
            warn!(address = %lm, "link map loops back on itself");
            break;
        }
        if entries.len() >= MAX_LINK_MAP_ENTRIES {
            warn!(count = entries.len(), "link map too long, stopping");
            break;
        }
        let l_addr = mem.read_pointer(lm + lmo.l_addr_offset as u64, ptr_size, endian)?;
        let l_name = mem.read_pointer(lm + lmo.l_name_offset as u64, ptr_size, endian)?;
        let l_ld = mem.read_pointer(lm + lmo.l_ld_offset as u64, ptr_size, endian)?;
        let l_next = mem.read_pointer(lm + lmo.l_next_offset as u64, ptr_size, endian)?;
        let name = if l_name == Address::ZERO {
            String::new()
        } else {
            read_c_string(mem, l_name, MAX_SONAME)?
        };
        trace!(address = %lm, %l_addr, %name, "link map entry");
        entries.push(LinkMapEntry {
            address: lm,
            l_addr,
            l_ld,
            name,
        });
        lm = l_next;
    }

    debug!(count = entries.len(), "walked link map");
    Ok(entries)
}

fn first_exec_load<Elf>(file: &ElfFile<'_, Elf>) -> Option<u64>
where
    Elf: FileHeader<Endian = Endianness>,
{
    let endian = file.endian();
    file.elf_program_headers()
        .iter()
        .find(|ph| ph.p_type(endian) == PT_LOAD && ph.p_flags(endian) & PF_X != 0)
        .map(|ph| ph.p_vaddr(endian).into())
}

/// Link-time virtual address of the first executable `PT_LOAD` segment.
///
/// # Errors
///
/// `Elf` when the data is not an ELF file or has no executable load segment.
pub fn exec_segment_vaddr(elf: &[u8]) -> Result<u64>
{
    let vaddr = match FileKind::parse(elf)? {
        FileKind::Elf32 => first_exec_load(&ElfFile32::<Endianness>::parse(elf)?),
        FileKind::Elf64 => first_exec_load(&ElfFile64::<Endianness>::parse(elf)?),
        other => return Err(NtoError::Elf(format!("not an ELF object: {other:?}"))),
    };
    vaddr.ok_or_else(|| NtoError::Elf("no executable PT_LOAD segment".into()))
}

/// Load bias for an object whose runtime linker recorded `l_addr`.
///
/// # Errors
///
/// See [`exec_segment_vaddr`].
pub fn load_bias(elf: &[u8], l_addr: Address, ptr_size: usize) -> Result<u64>
{
    let vaddr = exec_segment_vaddr(elf)?;
    let bias = Address::new(l_addr.value().wrapping_sub(vaddr)).truncate(ptr_size);
    debug!(%l_addr, vaddr, bias = bias.value(), "computed load bias");
    Ok(bias.value())
}

/// Shift one section range by `bias`, wrapping at the pointer width.
#[must_use]
pub fn relocate_range(range: &SectionRange, bias: u64, ptr_size: usize) -> SectionRange
{
    SectionRange {
        name: range.name.clone(),
        start: Address::new(range.start.value().wrapping_add(bias)).truncate(ptr_size),
        end: Address::new(range.end.value().wrapping_add(bias)).truncate(ptr_size),
    }
}

/// Allocated sections of an ELF file at their link-time addresses.
///
/// # Errors
///
/// `Elf` on unparsable input.
pub fn section_table(elf: &[u8]) -> Result<Vec<SectionRange>>
{
    let file = object::File::parse(elf)?;
    let mut sections = Vec::new();
    for section in file.sections() {
        let start = section.address();
        if start == 0 || section.size() == 0 {
            continue;
        }
        let name = section.name().unwrap_or("").to_string();
        sections.push(SectionRange {
            name,
            start: Address::new(start),
            end: Address::new(start.wrapping_add(section.size())),
        });
    }
    Ok(sections)
}

/// Runtime addresses of `elf`'s sections for the loaded object `entry`.
///
/// # Errors
///
/// `Elf` when the local copy cannot be parsed or has no executable segment.
pub fn relocate(entry: &LinkMapEntry, elf: &[u8], ptr_size: usize) -> Result<Vec<SectionRange>>
{
    let bias = load_bias(elf, entry.l_addr, ptr_size)?;
    let relocated = section_table(elf)?
        .iter()
        .map(|range| relocate_range(range, bias, ptr_size))
        .collect();
    Ok(relocated)
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct Flat
    {
        base: u64,
        bytes: Vec<u8>,
    }

    impl MemoryAccess for Flat
    {
        fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize>
        {
            let Some(start) = addr.value().checked_sub(self.base) else {
                return Ok(0);
            };
            let start = start as usize;
            if start >= self.bytes.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.bytes.len() - start);
            buf[..n].copy_from_slice(&self.bytes[start..start + n]);
            Ok(n)
        }

        fn write_memory(&mut self, _addr: Address, _data: &[u8]) -> Result<usize>
        {
            Ok(0)
        }
    }

    fn put(bytes: &mut [u8], at: usize, value: u32)
    {
        bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_offsets_are_shared()
    {
        let a = fetch_link_map_offsets(4);
        let b = fetch_link_map_offsets(4);
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.l_next_offset, 12);
        assert_eq!(fetch_link_map_offsets(8).l_next_offset, 24);
    }

    #[test]
    fn test_relocate_range_wraps_at_pointer_width()
    {
        let range = SectionRange {
            name: ".data".into(),
            start: Address::new(0xffff_f000),
            end: Address::new(0xffff_f800),
        };
        let moved = relocate_range(&range, 0x2000, 4);
        assert_eq!(moved.start, Address::new(0x1000));
        assert_eq!(moved.end, Address::new(0x1800));
    }

    #[test]
    fn test_walk_stops_on_cycle()
    {
        // r_debug at 0x100, two link_maps at 0x200 and 0x300 pointing at each other
        let base = 0x100;
        let mut bytes = vec![0u8; 0x400];
        put(&mut bytes, 0x104 - base, 0x200);
        put(&mut bytes, 0x200 - base, 0);
        put(&mut bytes, 0x204 - base, 0);
        put(&mut bytes, 0x20c - base, 0x300);
        put(&mut bytes, 0x300 - base, 0x7800_0000);
        put(&mut bytes, 0x304 - base, 0x380);
        put(&mut bytes, 0x30c - base, 0x200);
        bytes[0x380 - base..0x380 - base + 11].copy_from_slice(b"libc.so.3\0\0");
        let mut mem = Flat {
            base: base as u64,
            bytes,
        };

        let entries = walk_link_map(&mut mem, Address::new(0x100), 4, Endian::Little).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "");
        assert_eq!(entries[1].name, "libc.so.3");
        assert_eq!(entries[1].l_addr, Address::new(0x7800_0000));
    }

    #[test]
    fn test_read_c_string_is_bounded()
    {
        let mut mem = Flat {
            base: 0,
            bytes: vec![b'a'; 2000],
        };
        let name = read_c_string(&mut mem, Address::ZERO, MAX_SONAME).unwrap();
        assert_eq!(name.len(), MAX_SONAME);
    }
}
