//! Link-map relocation and Neutrino core handling against hand-built ELF files.

use std::fs;

use ntodbg_core::arch::Architecture;
use ntodbg_core::error::{NtoError, Result};
use ntodbg_core::linkmap::{exec_segment_vaddr, load_bias, relocate, LinkMapEntry};
use ntodbg_core::nto::{auxv, find_aux, note, read_auxv, ElfImage, OsAbi, SolibSearch};
use ntodbg_core::target::MemoryAccess;
use ntodbg_core::types::{Address, ThreadId, ThreadState};
use ntodbg_protocol::Endian;

const ET_EXEC: u16 = 2;
const ET_CORE: u16 = 4;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PF_X: u32 = 1;
const PF_R: u32 = 4;
const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

struct Segment
{
    p_type: u32,
    flags: u32,
    vaddr: u32,
    data: Vec<u8>,
}

struct Section
{
    name: &'static str,
    sh_type: u32,
    addr: u32,
    data: Vec<u8>,
}

/// Minimal little-endian ELF32 writer.
struct ElfBuilder
{
    e_type: u16,
    segments: Vec<Segment>,
    sections: Vec<Section>,
}

fn u16le(out: &mut Vec<u8>, v: u16)
{
    out.extend_from_slice(&v.to_le_bytes());
}

fn u32le(out: &mut Vec<u8>, v: u32)
{
    out.extend_from_slice(&v.to_le_bytes());
}

fn align4(out: &mut Vec<u8>)
{
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

impl ElfBuilder
{
    fn new(e_type: u16) -> Self
    {
        Self {
            e_type,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    fn segment(mut self, p_type: u32, flags: u32, vaddr: u32, data: Vec<u8>) -> Self
    {
        self.segments.push(Segment {
            p_type,
            flags,
            vaddr,
            data,
        });
        self
    }

    fn section(mut self, name: &'static str, addr: u32, data: Vec<u8>) -> Self
    {
        self.sections.push(Section {
            name,
            sh_type: SHT_PROGBITS,
            addr,
            data,
        });
        self
    }

    fn build(self) -> Vec<u8>
    {
        let phoff = 52usize;
        let mut body = vec![0u8; phoff + 32 * self.segments.len()];

        let mut seg_offsets = Vec::new();
        for seg in &self.segments {
            align4(&mut body);
            seg_offsets.push(body.len());
            body.extend_from_slice(&seg.data);
        }

        let mut shstrtab = vec![0u8];
        let mut sec_entries = Vec::new();
        for sec in &self.sections {
            align4(&mut body);
            let name_off = shstrtab.len();
            shstrtab.extend_from_slice(sec.name.as_bytes());
            shstrtab.push(0);
            sec_entries.push((name_off, sec.sh_type, sec.addr, body.len(), sec.data.len()));
            body.extend_from_slice(&sec.data);
        }
        let strtab_name = shstrtab.len();
        shstrtab.extend_from_slice(b".shstrtab\0");
        let strtab_off = body.len();
        body.extend_from_slice(&shstrtab);
        sec_entries.push((strtab_name, SHT_STRTAB, 0, strtab_off, shstrtab.len()));

        align4(&mut body);
        let shoff = body.len();
        body.extend_from_slice(&[0u8; 40]);
        for (name, sh_type, addr, offset, size) in &sec_entries {
            for v in [*name as u32, *sh_type, 0, *addr, *offset as u32, *size as u32, 0, 0, 1, 0] {
                u32le(&mut body, v);
            }
        }

        let mut header = Vec::new();
        header.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        header.extend_from_slice(&[0u8; 8]);
        u16le(&mut header, self.e_type);
        u16le(&mut header, EM_386);
        u32le(&mut header, 1);
        u32le(&mut header, 0);
        u32le(&mut header, phoff as u32);
        u32le(&mut header, shoff as u32);
        u32le(&mut header, 0);
        u16le(&mut header, 52);
        u16le(&mut header, 32);
        u16le(&mut header, self.segments.len() as u16);
        u16le(&mut header, 40);
        u16le(&mut header, sec_entries.len() as u16 + 1);
        u16le(&mut header, sec_entries.len() as u16);
        body[..52].copy_from_slice(&header);

        for (i, (seg, offset)) in self.segments.iter().zip(&seg_offsets).enumerate() {
            let mut ph = Vec::new();
            let size = seg.data.len() as u32;
            for v in [seg.p_type, *offset as u32, seg.vaddr, seg.vaddr, size, size, seg.flags, 4] {
                u32le(&mut ph, v);
            }
            let at = phoff + 32 * i;
            body[at..at + 32].copy_from_slice(&ph);
        }
        body
    }
}

fn qnx_note(n_type: u32, desc: &[u8]) -> Vec<u8>
{
    let mut out = Vec::new();
    u32le(&mut out, 4);
    u32le(&mut out, desc.len() as u32);
    u32le(&mut out, n_type);
    out.extend_from_slice(b"QNX\0");
    out.extend_from_slice(desc);
    align4(&mut out);
    out
}

/// A `debug_thread_t` with the fields the core reader looks at.
fn thread_status(tid: i32, state: u8, flags: u32) -> Vec<u8>
{
    let mut desc = vec![0u8; 256];
    desc[0..4].copy_from_slice(&1234i32.to_le_bytes());
    desc[4..8].copy_from_slice(&tid.to_le_bytes());
    desc[8..12].copy_from_slice(&flags.to_le_bytes());
    desc[59] = state;
    desc
}

fn core_with_notes(notes: &[(u32, Vec<u8>)]) -> ElfBuilder
{
    let mut data = Vec::new();
    for (n_type, desc) in notes {
        data.extend(qnx_note(*n_type, desc));
    }
    ElfBuilder::new(ET_CORE).segment(PT_NOTE, 0, 0, data)
}

#[test]
fn test_relocation_uses_first_executable_segment()
{
    let elf = ElfBuilder::new(ET_EXEC)
        .segment(PT_LOAD, PF_R, 0, vec![0; 16])
        .segment(PT_LOAD, PF_R | PF_X, 0x1000, vec![0x90; 16])
        .section(".text", 0x1000, vec![0x90; 16])
        .build();

    assert_eq!(exec_segment_vaddr(&elf).unwrap(), 0x1000);

    let entry = LinkMapEntry {
        address: Address::new(0x7000),
        l_addr: Address::new(0x8000_1000),
        l_ld: Address::ZERO,
        name: "libfoo.so".into(),
    };
    let sections = relocate(&entry, &elf, 4).unwrap();
    let text = sections.iter().find(|s| s.name == ".text").unwrap();
    assert_eq!(text.start, Address::new(0x8000_1000));
    assert_eq!(text.end, Address::new(0x8000_1010));
}

#[test]
fn test_load_bias_truncated_to_pointer_width()
{
    let elf = ElfBuilder::new(ET_EXEC)
        .segment(PT_LOAD, PF_R | PF_X, 0x2000, vec![0; 4])
        .build();
    // l_addr below the segment address wraps within 32 bits
    assert_eq!(load_bias(&elf, Address::new(0x1000), 4).unwrap(), 0xffff_f000);
}

#[test]
fn test_no_executable_segment_is_an_error()
{
    let elf = ElfBuilder::new(ET_EXEC)
        .segment(PT_LOAD, PF_R, 0x1000, vec![0; 4])
        .build();
    assert!(matches!(exec_segment_vaddr(&elf), Err(NtoError::Elf(_))));
}

#[test]
fn test_core_sysinfo_note_selects_qnx()
{
    let core = core_with_notes(&[(note::QNT_CORE_INFO, vec![0; 8]), (note::QNT_CORE_SYSINFO, vec![0; 8])]).build();
    let image = ElfImage::parse(&core).unwrap();
    assert!(image.is_core);
    assert_eq!(image.architecture, Some(Architecture::X86));
    assert_eq!(image.osabi().unwrap(), OsAbi::Qnx);
}

#[test]
fn test_core_info_alone_does_not_decide()
{
    let core = core_with_notes(&[(note::QNT_CORE_INFO, vec![0; 8])]).build();
    assert_eq!(ElfImage::parse(&core).unwrap().osabi().unwrap(), OsAbi::Unknown);
}

#[test]
fn test_null_note_is_internal_error()
{
    let core = core_with_notes(&[(note::QNT_NULL, vec![0; 4])]).build();
    let err = ElfImage::parse(&core).unwrap().osabi().unwrap_err();
    assert!(matches!(err, NtoError::Internal(_)));
}

#[test]
fn test_executable_assumed_qnx()
{
    let elf = ElfBuilder::new(ET_EXEC)
        .segment(PT_LOAD, PF_R | PF_X, 0x1000, vec![0; 4])
        .build();
    assert_eq!(ElfImage::parse(&elf).unwrap().osabi().unwrap(), OsAbi::Qnx);
}

#[test]
fn test_core_threads_enriched_from_status()
{
    let core = core_with_notes(&[
        (note::QNT_CORE_SYSINFO, vec![0; 8]),
        (note::QNT_CORE_STATUS, thread_status(1, 3, 0x41)),
        (note::QNT_CORE_GREG, vec![0; 52]),
        (note::QNT_CORE_STATUS, thread_status(2, 6, 0)),
        (note::QNT_CORE_GREG, vec![0; 52]),
    ])
    .section(".qnx_core_status/9", 0, thread_status(9, 1, 0))
    .build();
    let image = ElfImage::parse(&core).unwrap();

    let mut threads = image.core_threads();
    let tids: Vec<_> = threads.iter().map(|t| t.tid).collect();
    assert_eq!(tids, vec![ThreadId(1), ThreadId(2)]);

    // tid 9 has a status section but no registers; it is skipped
    assert_eq!(image.enrich_core_threads(&mut threads), 2);
    assert_eq!(threads[0].state, ThreadState::Stopped);
    assert_eq!(threads[0].flags, 0x41);
    assert_eq!(threads[1].state, ThreadState::Reply);
}

struct Stack
{
    base: u64,
    words: Vec<u32>,
}

impl MemoryAccess for Stack
{
    fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize>
    {
        let bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let start = (addr.value() - self.base) as usize;
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write_memory(&mut self, _addr: Address, _data: &[u8]) -> Result<usize>
    {
        Ok(0)
    }
}

#[test]
fn test_auxv_after_argv_and_envp()
{
    let mut stack = Stack {
        base: 0x1000,
        words: vec![
            2,
            0x2000,
            0x2010,
            0,
            0x2020,
            0,
            auxv::AT_PAGESZ as u32,
            4096,
            auxv::AT_BASE as u32,
            0x7800_0000,
            auxv::AT_NULL as u32,
            0,
        ],
    };
    let entries = read_auxv(&mut stack, Address::new(0x1000), 4, Endian::Little).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(find_aux(&entries, auxv::AT_BASE), Some(0x7800_0000));
    assert_eq!(find_aux(&entries, auxv::AT_ENTRY), None);
}

#[test]
fn test_solib_lookup_order_and_fallback()
{
    let root = std::env::temp_dir().join(format!("ntodbg-solib-{}", std::process::id()));
    let arch_root = root.join("armle");
    fs::create_dir_all(arch_root.join("usr/lib")).unwrap();
    fs::create_dir_all(arch_root.join("opt/app")).unwrap();
    fs::write(arch_root.join("usr/lib/libm.so.2"), b"").unwrap();
    fs::write(arch_root.join("opt/app/libapp.so"), b"").unwrap();

    let search = SolibSearch::new(&root, Architecture::Arm, Endian::Little, None);
    assert_eq!(search.find("/proc/boot/libm.so.2"), Some(arch_root.join("usr/lib/libm.so.2")));
    assert_eq!(search.find("/opt/app/libapp.so"), Some(arch_root.join("opt/app/libapp.so")));
    assert_eq!(search.find("libnothere.so"), None);

    fs::remove_dir_all(&root).unwrap();
}
