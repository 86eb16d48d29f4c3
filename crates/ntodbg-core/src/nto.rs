//! # Neutrino OS ABI
//!
//! Everything about a target that depends on it being QNX Neutrino rather
//! than on the CPU:
//!
//! - recognising Neutrino ELF files and core dumps from their `QNX` notes
//! - per-thread state recorded in a core's `.qnx_core_status/<tid>` sections
//! - the auxiliary vector left on a process's initial stack
//! - where the host keeps copies of target shared objects
//!
//! ## Core files
//!
//! A Neutrino core carries one `QNT_CORE_STATUS` note (a `debug_thread_t`)
//! per thread, followed by that thread's `QNT_CORE_GREG`/`QNT_CORE_FPREG`.
//! They are exposed the way a generic core reader would name them:
//! `.qnx_core_status/<tid>` and `.reg/<tid>`. Sections with those names in
//! the section table are taken as well.

use std::env;
use std::path::{Path, PathBuf};

use ntodbg_protocol::Endian;
use object::read::elf::{ElfFile, ElfFile32, ElfFile64, FileHeader, ProgramHeader, SectionHeader};
use object::{elf, Endianness, FileKind, Object, ObjectKind, ObjectSection};
use tracing::{debug, trace, warn};

use crate::arch::Architecture;
use crate::error::{NtoError, Result};
use crate::procfs::types::ProcfsStatus;
use crate::target::MemoryAccess;
use crate::types::{Address, ThreadId, ThreadInfo, ThreadState};

/// Owner name of Neutrino ELF notes.
pub const QNX_NOTE_NAME: &str = "QNX";

/// Note types found under [`QNX_NOTE_NAME`] (`QNT_*`).
pub mod note
{
    pub const QNT_NULL: u32 = 0;
    pub const QNT_DEBUG_FULLPATH: u32 = 1;
    pub const QNT_DEBUG_RELOC: u32 = 2;
    pub const QNT_STACK: u32 = 3;
    pub const QNT_GENERATOR: u32 = 4;
    pub const QNT_DEFAULT_LIB: u32 = 5;
    pub const QNT_CORE_SYSINFO: u32 = 6;
    pub const QNT_CORE_INFO: u32 = 7;
    pub const QNT_CORE_STATUS: u32 = 8;
    pub const QNT_CORE_GREG: u32 = 9;
    pub const QNT_CORE_FPREG: u32 = 10;
}

/// Prefix of the per-thread status sections in a core.
pub const CORE_STATUS_PREFIX: &str = ".qnx_core_status/";
/// Prefix of the per-thread general register sections in a core.
pub const CORE_REG_PREFIX: &str = ".reg/";

/// Default for `QNX_TARGET` when the environment does not set it.
pub const DEFAULT_QNX_TARGET: &str = "/opt/qnx/target/qnx";

/// Auxiliary vector tags (`AT_*`) the debugger looks at.
pub mod auxv
{
    pub const AT_NULL: u64 = 0;
    pub const AT_PHDR: u64 = 3;
    pub const AT_PHENT: u64 = 4;
    pub const AT_PHNUM: u64 = 5;
    pub const AT_PAGESZ: u64 = 6;
    pub const AT_BASE: u64 = 7;
    pub const AT_ENTRY: u64 = 9;
}

/// Pointer-sized words scanned before giving up on argv/envp/auxv.
const MAX_STACK_WORDS: usize = 16 * 1024;

/// OS ABI verdict for an ELF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsAbi
{
    Qnx,
    Unknown,
}

/// One ELF note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfNote
{
    pub name: String,
    pub n_type: u32,
    pub desc: Vec<u8>,
}

impl ElfNote
{
    fn is_qnx(&self) -> bool
    {
        self.name == QNX_NOTE_NAME
    }
}

/// A named block of bytes from a core, real section or note-backed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSection
{
    pub name: String,
    pub data: Vec<u8>,
}

/// The parts of an ELF file the OS ABI layer cares about.
#[derive(Debug, Clone)]
pub struct ElfImage
{
    /// `None` for machines Neutrino does not run on.
    pub architecture: Option<Architecture>,
    pub endian: Endian,
    pub is_core: bool,
    pub notes: Vec<ElfNote>,
    pub sections: Vec<CoreSection>,
}

fn architecture_from_machine(e_machine: u16) -> Option<Architecture>
{
    match e_machine {
        elf::EM_386 => Some(Architecture::X86),
        elf::EM_PPC => Some(Architecture::Ppc),
        elf::EM_MIPS => Some(Architecture::Mips),
        elf::EM_SH => Some(Architecture::Sh),
        elf::EM_ARM => Some(Architecture::Arm),
        _ => None,
    }
}

fn inspect<Elf>(file: &ElfFile<'_, Elf>) -> Result<ElfImage>
where
    Elf: FileHeader<Endian = Endianness>,
{
    let endian = file.endian();
    let data = file.data();

    let mut notes = Vec::new();
    for ph in file.elf_program_headers() {
        if let Some(mut iter) = ph.notes(endian, data)? {
            while let Some(n) = iter.next()? {
                notes.push(ElfNote {
                    name: String::from_utf8_lossy(n.name()).into_owned(),
                    n_type: n.n_type(endian),
                    desc: n.desc().to_vec(),
                });
            }
        }
    }
    if notes.is_empty() {
        for sh in file.elf_section_table().iter() {
            if let Some(mut iter) = sh.notes(endian, data)? {
                while let Some(n) = iter.next()? {
                    notes.push(ElfNote {
                        name: String::from_utf8_lossy(n.name()).into_owned(),
                        n_type: n.n_type(endian),
                        desc: n.desc().to_vec(),
                    });
                }
            }
        }
    }

    let mut sections = Vec::new();
    for section in file.sections() {
        let Ok(name) = section.name() else { continue };
        if name.starts_with(CORE_STATUS_PREFIX) || name.starts_with(CORE_REG_PREFIX) {
            sections.push(CoreSection {
                name: name.to_string(),
                data: section.data()?.to_vec(),
            });
        }
    }

    let endian = match endian {
        Endianness::Little => Endian::Little,
        Endianness::Big => Endian::Big,
    };
    Ok(ElfImage {
        architecture: architecture_from_machine(file.elf_header().e_machine(file.endian())),
        endian,
        is_core: file.kind() == ObjectKind::Core,
        notes,
        sections,
    })
}

impl ElfImage
{
    /// Parse an ELF executable, shared object or core dump.
    ///
    /// # Errors
    ///
    /// `Elf` for anything that is not a well-formed ELF file.
    pub fn parse(data: &[u8]) -> Result<Self>
    {
        let mut image = match FileKind::parse(data)? {
            FileKind::Elf32 => inspect(&ElfFile32::<Endianness>::parse(data)?)?,
            FileKind::Elf64 => inspect(&ElfFile64::<Endianness>::parse(data)?)?,
            other => return Err(NtoError::Elf(format!("not an ELF file: {other:?}"))),
        };
        image.synthesize_core_sections();
        Ok(image)
    }

    /// Read and parse an ELF file from disk.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, otherwise as [`ElfImage::parse`].
    pub fn open(path: &Path) -> Result<Self>
    {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Name core notes the way a generic core reader names its sections.
    fn synthesize_core_sections(&mut self)
    {
        if !self.is_core {
            return;
        }
        let mut current_tid = None;
        let mut extra = Vec::new();
        for n in self.notes.iter().filter(|n| n.is_qnx()) {
            match n.n_type {
                note::QNT_CORE_STATUS => match ProcfsStatus::parse_with(&n.desc, self.endian) {
                    Ok(status) => {
                        current_tid = Some(status.tid);
                        extra.push(CoreSection {
                            name: format!("{CORE_STATUS_PREFIX}{}", status.tid),
                            data: n.desc.clone(),
                        });
                    }
                    Err(err) => warn!(error = %err, "unreadable core status note"),
                },
                note::QNT_CORE_GREG => {
                    if let Some(tid) = current_tid {
                        extra.push(CoreSection {
                            name: format!("{CORE_REG_PREFIX}{tid}"),
                            data: n.desc.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        for section in extra {
            if !self.sections.iter().any(|s| s.name == section.name) {
                self.sections.push(section);
            }
        }
    }

    /// Decide whether this file belongs to Neutrino.
    ///
    /// Cores are judged by their notes: a `QNT_CORE_SYSINFO` note settles it,
    /// other notes say nothing. Anything that is not a core is assumed to be
    /// a Neutrino binary; the user picked it.
    ///
    /// # Errors
    ///
    /// `Internal` for a `QNT_NULL` note, which a Neutrino dump never contains.
    pub fn osabi(&self) -> Result<OsAbi>
    {
        if !self.is_core {
            debug!("not a core file, assuming Neutrino");
            return Ok(OsAbi::Qnx);
        }
        let mut verdict = OsAbi::Unknown;
        for n in self.notes.iter().filter(|n| n.is_qnx()) {
            match n.n_type {
                note::QNT_NULL => {
                    return Err(NtoError::Internal("QNX core note of type QNT_NULL".into()));
                }
                note::QNT_CORE_SYSINFO => verdict = OsAbi::Qnx,
                note::QNT_CORE_INFO => trace!("core info note"),
                other => trace!(n_type = other, "other QNX note"),
            }
        }
        Ok(verdict)
    }

    /// Threads a generic core reader would list: one per `.reg/<tid>`.
    #[must_use]
    pub fn core_threads(&self) -> Vec<ThreadInfo>
    {
        let mut threads: Vec<ThreadInfo> = self
            .sections
            .iter()
            .filter_map(|s| section_tid(&s.name, CORE_REG_PREFIX))
            .map(|tid| ThreadInfo {
                tid,
                state: ThreadState::Unknown(u8::MAX),
                flags: 0,
            })
            .collect();
        threads.sort_by_key(|t| t.tid.raw());
        threads.dedup_by_key(|t| t.tid.raw());
        threads
    }

    /// Fill in state and flags of `threads` from the core status sections.
    ///
    /// Returns how many threads were updated. A status section for a thread
    /// that is not in the list is reported and skipped.
    pub fn enrich_core_threads(&self, threads: &mut [ThreadInfo]) -> usize
    {
        let mut updated = 0;
        for section in &self.sections {
            let Some(tid) = section_tid(&section.name, CORE_STATUS_PREFIX) else {
                continue;
            };
            let Some(thread) = threads.iter_mut().find(|t| t.tid == tid) else {
                warn!(%tid, "core status for a thread the core does not list");
                continue;
            };
            match ProcfsStatus::parse_with(&section.data, self.endian) {
                Ok(status) => {
                    thread.state = status.thread_state();
                    thread.flags = status.flags;
                    updated += 1;
                    trace!(%tid, state = %thread.state, flags = status.flags, "core thread status");
                }
                Err(err) => warn!(%tid, error = %err, "unreadable core status section"),
            }
        }
        updated
    }
}

/// Thread id encoded after `prefix` in a section name.
#[must_use]
pub fn section_tid(name: &str, prefix: &str) -> Option<ThreadId>
{
    name.strip_prefix(prefix)?.parse::<i32>().ok().map(ThreadId)
}

/// One `(a_type, a_val)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxEntry
{
    pub a_type: u64,
    pub a_val: u64,
}

/// Read the auxiliary vector the kernel left above a process's initial stack.
///
/// The stack starts with `argc`, then `argv[]` and `envp[]` (each
/// NULL-terminated), then the `auxv` pairs up to `AT_NULL`.
///
/// # Errors
///
/// Memory that cannot be read, or a vector that never terminates.
pub fn read_auxv<M: MemoryAccess + ?Sized>(
    mem: &mut M,
    initial_stack: Address,
    ptr_size: usize,
    endian: Endian,
) -> Result<Vec<AuxEntry>>
{
    let word = ptr_size as u64;
    let argc = mem.read_pointer(initial_stack, ptr_size, endian)?.value();
    // argv[argc] is the terminating NULL
    let mut at = initial_stack + word * (argc + 2);

    let mut words = 0;
    while mem.read_pointer(at, ptr_size, endian)? != Address::ZERO {
        at = at + word;
        words += 1;
        if words > MAX_STACK_WORDS {
            return Err(NtoError::Internal("environment on the initial stack does not end".into()));
        }
    }
    at = at + word;

    let mut entries = Vec::new();
    loop {
        let a_type = mem.read_pointer(at, ptr_size, endian)?.value();
        let a_val = mem.read_pointer(at + word, ptr_size, endian)?.value();
        if a_type == auxv::AT_NULL {
            break;
        }
        entries.push(AuxEntry { a_type, a_val });
        if entries.len() > MAX_STACK_WORDS {
            return Err(NtoError::Internal("auxiliary vector does not end".into()));
        }
        at = at + 2 * word;
    }
    debug!(count = entries.len(), argc, "read auxiliary vector");
    Ok(entries)
}

/// Value of the first entry with tag `a_type`.
#[must_use]
pub fn find_aux(entries: &[AuxEntry], a_type: u64) -> Option<u64>
{
    entries.iter().find(|e| e.a_type == a_type).map(|e| e.a_val)
}

/// Directory under `QNX_TARGET` holding a CPU's binaries.
///
/// x86 has no endian suffix. `variant` adds a CPU variant, e.g. `spe` for
/// PowerPC e500 (`ppcbe-spe`).
#[must_use]
pub fn target_subdir(arch: Architecture, endian: Endian, variant: Option<&str>) -> String
{
    let mut dir = arch.name().to_string();
    if arch != Architecture::X86 {
        dir.push_str(if endian.is_big() { "be" } else { "le" });
    }
    if let Some(variant) = variant.filter(|v| !v.is_empty()) {
        dir.push('-');
        dir.push_str(variant);
    }
    dir
}

/// Where shared objects of the target live on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolibSearch
{
    root: PathBuf,
    subdir: String,
}

impl SolibSearch
{
    pub fn new(root: impl Into<PathBuf>, arch: Architecture, endian: Endian, variant: Option<&str>) -> Self
    {
        Self {
            root: root.into(),
            subdir: target_subdir(arch, endian, variant),
        }
    }

    /// Root from `QNX_TARGET`, or [`DEFAULT_QNX_TARGET`].
    pub fn from_env(arch: Architecture, endian: Endian, variant: Option<&str>) -> Self
    {
        let root = env::var_os("QNX_TARGET").map_or_else(|| PathBuf::from(DEFAULT_QNX_TARGET), PathBuf::from);
        Self::new(root, arch, endian, variant)
    }

    #[must_use]
    pub fn root(&self) -> &Path
    {
        &self.root
    }

    /// Target root for this CPU, e.g. `$QNX_TARGET/ppcbe-spe`.
    #[must_use]
    pub fn arch_root(&self) -> PathBuf
    {
        self.root.join(&self.subdir)
    }

    /// Default search path: `lib`, `usr/lib` and `lib/dll` under the CPU root.
    #[must_use]
    pub fn search_paths(&self) -> Vec<PathBuf>
    {
        let base = self.arch_root();
        ["lib", "usr/lib", "lib/dll"].iter().map(|dir| base.join(dir)).collect()
    }

    /// Find a host copy of the target object `name`.
    ///
    /// The basename is looked up in each search directory; after that an
    /// absolute target path is tried under the CPU root.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf>
    {
        let path = Path::new(name);
        if let Some(base) = path.file_name() {
            for dir in self.search_paths() {
                let candidate = dir.join(base);
                trace!(candidate = %candidate.display(), "solib candidate");
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        if path.is_absolute() {
            let relative = path.strip_prefix("/").unwrap_or(path);
            let candidate = self.arch_root().join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        debug!(name, "shared object not found on host");
        None
    }
}
