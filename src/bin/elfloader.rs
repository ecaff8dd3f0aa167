//! Demo CLI: loads an ELF into the flat demo MMU and runs it to completion.
//!
//! Generalized from the teacher's `src/bin/elfloader.rs` (same load-and-run
//! shape) onto the new `Jit`/`MemRegion` API, with `clap` for argument
//! parsing and `log`/`env_logger` in place of the teacher's `println!`s.

use clap::Parser;
use log::{info, warn};

use abt::error::MemoryError;
use abt::external::{EmulationCallbacks, ExceptionKind, MemoryCallbacks};
use abt::mem::MemRegion;
use abt::Jit;

/// Matches the teacher's `GuestMmu::new` region size; plenty for the small
/// bare-metal demos this loader targets.
const MEM_SIZE: usize = 0x0010_0000;

#[derive(Parser)]
#[command(about = "Load and run a bare A32/T32 ELF binary")]
struct Args {
    /// Path to the ELF binary to load.
    path: String,
}

/// Backs the callback surface `Jit` needs with the flat demo MMU, and
/// supplies the interpreter/exception hooks the demo doesn't implement: a
/// `SVC #0` halts the run (this loader's exit convention), anything else
/// this crate can't translate or doesn't understand is fatal, since there
/// is no real interpreter fallback behind this demo.
struct Emulator {
    mem: MemRegion,
    halted: bool,
}

impl MemoryCallbacks for Emulator {
    fn read8(&self, vaddr: u64) -> Result<u8, MemoryError> {
        self.mem.read8(vaddr)
    }
    fn read16(&self, vaddr: u64) -> Result<u16, MemoryError> {
        self.mem.read16(vaddr)
    }
    fn read32(&self, vaddr: u64) -> Result<u32, MemoryError> {
        self.mem.read32(vaddr)
    }
    fn read64(&self, vaddr: u64) -> Result<u64, MemoryError> {
        self.mem.read64(vaddr)
    }
    fn read128(&self, vaddr: u64) -> Result<u128, MemoryError> {
        self.mem.read128(vaddr)
    }
    fn write8(&mut self, vaddr: u64, value: u8) -> Result<(), MemoryError> {
        self.mem.write8(vaddr, value)
    }
    fn write16(&mut self, vaddr: u64, value: u16) -> Result<(), MemoryError> {
        self.mem.write16(vaddr, value)
    }
    fn write32(&mut self, vaddr: u64, value: u32) -> Result<(), MemoryError> {
        self.mem.write32(vaddr, value)
    }
    fn write64(&mut self, vaddr: u64, value: u64) -> Result<(), MemoryError> {
        self.mem.write64(vaddr, value)
    }
    fn write128(&mut self, vaddr: u64, value: u128) -> Result<(), MemoryError> {
        self.mem.write128(vaddr, value)
    }
    fn fetch_instruction(&self, vaddr: u64) -> Result<u32, MemoryError> {
        self.mem.fetch_instruction(vaddr)
    }
}

impl EmulationCallbacks for Emulator {
    fn interpret_one(&mut self, pc: u64) -> u64 {
        warn!("no interpreter fallback in this demo; halting at pc {pc:#010x}");
        self.halted = true;
        pc
    }

    fn raise_exception(&mut self, kind: ExceptionKind, pc: u64) {
        match kind {
            ExceptionKind::SupervisorCall { imm: 0 } => {
                info!("SVC #0 at {pc:#010x}: halting");
                self.halted = true;
            }
            other => {
                warn!("unhandled guest exception {other:?} at {pc:#010x}: halting");
                self.halted = true;
            }
        }
    }

    fn is_halted(&self) -> bool {
        self.halted
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let elf = elf::File::open_path(&args.path).unwrap_or_else(|e| panic!("{e:?}"));

    let mut mem = MemRegion::new("elfloader-mem", 0x0000_0000, MEM_SIZE);
    for section in elf.sections.iter() {
        if section.shdr.size == 0 {
            continue;
        }
        match section.shdr.name.as_str() {
            ".symtab" | ".strtab" | ".shstrtab" => continue,
            _ => {
                info!(
                    "loading section {} ({:#x} bytes) @ {:#010x}",
                    section.shdr.name, section.shdr.size, section.shdr.addr
                );
                mem.write_buf(section.shdr.addr as u32, &section.data);
            }
        }
    }

    let entry = elf.ehdr.entry as u32;
    let thumb = entry & 1 != 0;
    let pc = entry & !1;
    let cpsr = if thumb { 1 << 5 } else { 0 };

    let emulator = Emulator { mem, halted: false };
    let mut jit = Jit::new_a32(pc, cpsr, emulator);
    // Poison values matching the teacher's demo setup, so an uninitialised
    // register read is obviously wrong rather than silently zero.
    jit.set_reg_a32(11, 0xdead_0011);
    jit.set_reg_a32(13, 0x0000_8000);
    jit.set_reg_a32(14, 0xdead_0014);

    info!("entry point {:#010x} ({})", pc, if thumb { "T32" } else { "A32" });
    jit.run();
    info!("halted at pc {:#010x}", jit.pc());
}
