use std::error::Error;
use std::fs;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ntodbg_core::arch::{Architecture, WireArea};
use ntodbg_core::breakpoints::BreakpointKind;
use ntodbg_core::linkmap::{relocate, LinkMapEntry};
use ntodbg_core::nto::{ElfImage, SolibSearch, QNX_NOTE_NAME};
use ntodbg_core::procfs::{native_session, ProcfsConfig};
use ntodbg_core::remote::RemoteTarget;
use ntodbg_core::types::WaitStatus;
use ntodbg_core::{Address, ProcessId, Target};
use ntodbg_protocol::Endian;
use ntodbg_utils::{info, init_logging, init_logging_with_level, Config, LogFormat, LogLevel};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Host-side debugger tools for QNX Neutrino targets.
#[derive(Parser, Debug)]
#[command(name = "ntodbg")]
#[command(version)]
#[command(about = "Host-side debugger tools for QNX Neutrino targets", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json); overrides NTODBG_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Show how a register range is split into wire transfers
    Regs
    {
        /// CPU family (x86, arm, ppc, mips, sh)
        arch: Architecture,
        /// First register number
        #[arg(long, default_value_t = 0)]
        first: usize,
        /// Last register number (default: the last register)
        #[arg(long)]
        last: Option<usize>,
    },
    /// Inspect a core dump or ELF file: OS ABI, QNX notes, threads
    Core
    {
        file: PathBuf,
    },
    /// Find the host copy of a target shared object under QNX_TARGET
    Solib
    {
        arch: Architecture,
        /// Target path or basename of the object
        name: String,
        /// CPU variant suffix, e.g. "spe" for ppcbe-spe
        #[arg(long)]
        variant: Option<String>,
        #[arg(long)]
        big_endian: bool,
    },
    /// Print section addresses of an ELF file loaded at a link-map l_addr
    Relocate
    {
        elf: PathBuf,
        /// l_addr reported by the runtime linker (hex or decimal)
        #[arg(long, value_parser = parse_address)]
        l_addr: u64,
        #[arg(long, default_value_t = 4)]
        ptr_size: usize,
    },
    /// Connect to a pdebug agent over TCP
    Remote
    {
        /// host:port of the agent
        address: String,
        /// Attach to this process and show its registers and threads
        #[arg(long)]
        pid: Option<i32>,
        #[arg(long, default_value = "x86")]
        arch: Architecture,
        /// Plant a breakpoint before resuming
        #[arg(long, value_parser = parse_address)]
        break_at: Option<u64>,
        /// Resume and wait for the next stop (Ctrl-C interrupts)
        #[arg(long)]
        wait: bool,
    },
    /// Attach to a local process through /proc (QNX hosts only)
    Attach
    {
        pid: i32,
        /// Reach the process on another node through /net/<node>
        #[arg(long)]
        node: Option<String>,
        #[arg(long, value_parser = parse_address)]
        break_at: Option<u64>,
        #[arg(long)]
        wait: bool,
    },
}

fn parse_address(s: &str) -> Result<u64, String>
{
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn main()
{
    let cli = Cli::parse();

    let logging = match (cli.log_level, cli.log_format) {
        (None, None) => init_logging(),
        (level, format) => init_logging_with_level(level.unwrap_or(LogLevel::Info), format.unwrap_or_default()),
    };
    let _guard = match logging {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command, &config) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Commands, config: &Config) -> CliResult<()>
{
    match command {
        Commands::Regs { arch, first, last } => print_wire_plan(arch, first, last),
        Commands::Core { file } => {
            let image = ElfImage::open(&file)?;
            print_image(&file, &image)
        }
        Commands::Solib {
            arch,
            name,
            variant,
            big_endian,
        } => {
            let endian = if big_endian { Endian::Big } else { Endian::Little };
            let search = SolibSearch::new(&config.qnx_target, arch, endian, variant.as_deref());
            println!("Search path:");
            for dir in search.search_paths() {
                println!("  {}", dir.display());
            }
            match search.find(&name) {
                Some(path) => println!("{name} => {}", path.display()),
                None => println!("{name} not found"),
            }
            Ok(())
        }
        Commands::Relocate { elf, l_addr, ptr_size } => {
            let data = fs::read(&elf)?;
            let entry = LinkMapEntry {
                address: Address::ZERO,
                l_addr: Address::new(l_addr),
                l_ld: Address::ZERO,
                name: elf.display().to_string(),
            };
            for section in relocate(&entry, &data, ptr_size)? {
                println!("  {:<20} {:#010x} - {:#010x}", section.name, section.start.value(), section.end.value());
            }
            Ok(())
        }
        Commands::Remote {
            address,
            pid,
            arch,
            break_at,
            wait,
        } => {
            info!(%address, "connecting to pdebug");
            let stream = TcpStream::connect(&address)?;
            stream.set_read_timeout(Some(config.remote_timeout))?;
            let mut target = RemoteTarget::new(stream, arch);
            let (major, minor) = target.connect()?;
            println!("Connected to pdebug at {address} (protocol {major}.{minor})");
            install_interrupt(target.interrupt_flag())?;

            if let Some(pid) = pid {
                inspect(&mut target, ProcessId(pid), break_at, wait)?;
            }
            let console = target.take_console();
            if !console.is_empty() {
                print!("{}", String::from_utf8_lossy(&console));
            }
            target.disconnect()?;
            Ok(())
        }
        Commands::Attach {
            pid,
            node,
            break_at,
            wait,
        } => {
            let interrupted = Arc::new(AtomicBool::new(false));
            install_interrupt(Arc::clone(&interrupted))?;
            let procfs = ProcfsConfig {
                root: config.procfs_root.clone(),
                node,
            };
            let mut session = native_session(procfs, interrupted)?;
            inspect(&mut session, ProcessId(pid), break_at, wait)
        }
    }
}

fn install_interrupt(flag: Arc<AtomicBool>) -> CliResult<()>
{
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    Ok(())
}

fn print_wire_plan(arch: Architecture, first: usize, last: Option<usize>) -> CliResult<()>
{
    let codec = arch.codec();
    let last = last.unwrap_or_else(|| codec.num_registers().saturating_sub(1));
    println!("{arch} registers {first}..={last}:");
    let mut regno = first;
    while regno <= last {
        let name = codec.register_name(regno).unwrap_or("?");
        match codec.wire_area(regno, last)? {
            WireArea::Region {
                set,
                offset,
                length,
                last: covered,
            } => {
                println!("  {regno:>3}..={covered:<3} {name:<8} {set} offset {offset} length {length}");
                regno = covered + 1;
            }
            WireArea::Skip { last: covered } => {
                println!("  {regno:>3}..={covered:<3} {name:<8} not transferred");
                regno = covered + 1;
            }
        }
    }
    Ok(())
}

fn print_image(file: &std::path::Path, image: &ElfImage) -> CliResult<()>
{
    println!("{}:", file.display());
    println!("  Kind: {}", if image.is_core { "core dump" } else { "object" });
    match image.architecture {
        Some(arch) => println!("  Architecture: {arch} ({:?} endian)", image.endian),
        None => println!("  Architecture: not a Neutrino CPU"),
    }
    println!("  OS ABI: {:?}", image.osabi()?);

    let qnx_notes: Vec<_> = image.notes.iter().filter(|n| n.name == QNX_NOTE_NAME).collect();
    if !qnx_notes.is_empty() {
        println!("  QNX notes:");
        for note in qnx_notes {
            println!("    type {:>2}  {} bytes", note.n_type, note.desc.len());
        }
    }

    if image.is_core {
        let mut threads = image.core_threads();
        image.enrich_core_threads(&mut threads);
        println!("  Threads: {}", threads.len());
        for thread in &threads {
            println!("    {}", thread.extra_info());
        }
    }
    Ok(())
}

fn print_registers(target: &dyn Target)
{
    let codec = target.codec();
    let regs = target.registers();
    for regno in 0..codec.num_registers() {
        let Some(raw) = regs.raw(regno) else { continue };
        let name = codec.register_name(regno).unwrap_or("?");
        match regs.read_u64(regno, target.endian()) {
            Some(value) if raw.len() <= 8 => println!("  {name:<8} {value:#0width$x}", width = raw.len() * 2 + 2),
            _ => {
                let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
                println!("  {name:<8} {hex}");
            }
        }
    }
}

fn inspect(target: &mut dyn Target, pid: ProcessId, break_at: Option<u64>, wait: bool) -> CliResult<()>
{
    let tid = target.attach(pid)?;
    println!("Attached to process {pid} (thread {tid})");

    target.fetch_registers()?;
    println!("Registers:");
    print_registers(target);

    let threads = target.threads()?;
    println!("Threads: {}", threads.len());
    for thread in &threads {
        println!("  {}", thread.extra_info());
    }

    if let Some(addr) = break_at {
        let id = target.insert_breakpoint(Address::new(addr), BreakpointKind::Software, 0)?;
        println!("Breakpoint {id} at {addr:#x}");
    }

    if wait {
        target.resume(None, false, None)?;
        println!("Running; press Ctrl-C to stop");
        let event = target.wait()?;
        println!("Process {}: {}", event.pid, event.status);
        if matches!(event.status, WaitStatus::Exited(_) | WaitStatus::Signalled(_)) {
            return Ok(());
        }
        target.fetch_registers()?;
        if let Some(pc) = target.pc() {
            println!("Stopped at {pc}");
        }
    }

    target.detach(None)?;
    println!("Detached from process {pid}");
    Ok(())
}
