//! External collaborator contracts: the surface an embedder implements so
//! this crate's front-end/backend/dispatcher can fetch guest code, read and
//! write guest memory, and be told about guest exceptions, without this
//! crate owning an opinion on how any of that is backed.
//!
//! Generalized from the teacher's ad hoc `GuestMmu` (a single concrete
//! shared-memory region) into the trait-object contract spec.md §6/§9 calls
//! for ("Virtual callbacks... re-architect as a single capability struct").

pub use crate::ir::value::AccType;
use crate::error::MemoryError;

/// Guest memory access, code fetch, and permission queries. One instance is
/// shared by the front-end (code fetch), the backend's slow-path memory
/// handlers, and the dispatcher.
pub trait MemoryCallbacks {
    fn read8(&self, vaddr: u64) -> Result<u8, MemoryError>;
    fn read16(&self, vaddr: u64) -> Result<u16, MemoryError>;
    fn read32(&self, vaddr: u64) -> Result<u32, MemoryError>;
    fn read64(&self, vaddr: u64) -> Result<u64, MemoryError>;
    fn read128(&self, vaddr: u64) -> Result<u128, MemoryError>;

    fn write8(&mut self, vaddr: u64, value: u8) -> Result<(), MemoryError>;
    fn write16(&mut self, vaddr: u64, value: u16) -> Result<(), MemoryError>;
    fn write32(&mut self, vaddr: u64, value: u32) -> Result<(), MemoryError>;
    fn write64(&mut self, vaddr: u64, value: u64) -> Result<(), MemoryError>;
    fn write128(&mut self, vaddr: u64, value: u128) -> Result<(), MemoryError>;

    /// Fetches one guest instruction word for decoding; distinct from
    /// `read32` since an embedder may serve code from a different backing
    /// store than data (e.g. a read-only mapped ELF `.text`).
    fn fetch_instruction(&self, vaddr: u64) -> Result<u32, MemoryError>;

    /// `true` if writes to `vaddr` are rejected by the host MMU, letting
    /// `A32ConstantMemoryReads` treat the location as foldable.
    fn is_read_only_memory(&self, vaddr: u64) -> bool {
        let _ = vaddr;
        false
    }
}

/// Reasons translated code hands control back to the embedder rather than
/// running on through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    UndefinedInstruction,
    SupervisorCall { imm: u32 },
    Breakpoint,
    DataAbort { vaddr: u64 },
    PrefetchAbort { vaddr: u64 },
    Misaligned { vaddr: u64 },
}

/// Hooks an embedder supplies beyond raw memory access: interpreter
/// fallback for instructions this crate doesn't translate, exception
/// delivery, and tick/cycle accounting.
pub trait EmulationCallbacks: MemoryCallbacks {
    /// Interprets exactly one guest instruction at `pc`, used for the
    /// `Terminal::Interpret` escape hatch. Returns the guest PC to resume
    /// translated execution at.
    fn interpret_one(&mut self, pc: u64) -> u64;

    fn raise_exception(&mut self, kind: ExceptionKind, pc: u64);

    /// Called at each block boundary with the number of guest cycles
    /// `Jit::run` just charged against `cycles_remaining`. The default is a
    /// no-op; an embedder that wants its own tick source synchronized with
    /// guest execution (e.g. to drive timer interrupts) overrides it.
    fn add_ticks(&mut self, ticks: u64) {
        let _ = ticks;
    }

    /// Cycles left to run before `Jit::run` should return control to the
    /// embedder, per spec.md §6's `AddTicks`/`GetTicksRemaining` pair. The
    /// default of `u64::MAX` means "run until halted," i.e. no embedder-
    /// imposed budget.
    fn get_ticks_remaining(&self) -> u64 {
        u64::MAX
    }

    fn is_halted(&self) -> bool {
        false
    }
}

/// A32 coprocessor access (`MCR`/`MRC`/`CDP`/`LDC`/`STC`). Kept as a
/// separate trait since most guests only ever touch CP15 system control
/// registers through it and an embedder without coprocessor support can
/// leave it unimplemented and let those instructions fall through to
/// `Terminal::Interpret`.
pub trait CoprocessorCallbacks {
    fn internal_operation(&mut self, coproc: u8, opc1: u8, crd: u8, crn: u8, crm: u8, opc2: u8);
    fn send_one_word(&mut self, coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8, value: u32);
    fn send_two_words(&mut self, coproc: u8, opc: u8, crm: u8, value1: u32, value2: u32);
    fn get_one_word(&mut self, coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8) -> u32;
    fn get_two_words(&mut self, coproc: u8, opc: u8, crm: u8) -> (u32, u32);
}
