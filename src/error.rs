//! Error taxonomy for the recoverable paths described in spec.md §7.
//!
//! Everything else — a malformed `Inst` signature, an optimizer pass
//! observing an invariant it relies on having been broken, a regalloc
//! bookkeeping inconsistency — stays a `panic!`/`debug_assert!` per §7's
//! "these are programmer errors in this crate, not guest-triggerable
//! conditions, and should fail loudly in development."

use thiserror::Error;

/// Front-end decode failures: the bytes at a `LocationDescriptor` don't
/// decode to an instruction this crate translates.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unallocated or unpredictable encoding {word:#010x} at pc {pc:#010x}")]
    Unallocated { pc: u64, word: u32 },
    #[error("encoding {word:#010x} at pc {pc:#010x} is recognised but not yet translated")]
    Unimplemented { pc: u64, word: u32 },
    #[error("ran off the end of mapped memory while fetching the instruction at pc {pc:#010x}")]
    Truncated { pc: u64 },
}

/// Translation-time failures that should fall back to the interpreter
/// rather than abort the whole run.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("block exceeded the maximum instruction count before a terminal was reached")]
    BlockTooLong,
    #[error("unsupported coprocessor access: cp{coproc} at pc {pc:#010x}")]
    UnsupportedCoprocessor { coproc: u8, pc: u64 },
    #[error("{arch} translation is not implemented by this crate's front-end")]
    UnsupportedArch { arch: &'static str },
}

/// Guest memory access failures surfaced by `MemoryCallbacks`/`MemRegion`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("access at {addr:#x} (len {len}) is out of bounds for this region")]
    OutOfBounds { addr: u64, len: usize },
    #[error("access at {addr:#x} is not permitted by the host MMU")]
    PermissionDenied { addr: u64 },
}

/// Backend emission failures: spec.md §7 classifies these as fatal
/// ("the backend ran out of addressable constant-pool space" and similar
/// resource exhaustion are process-terminating, since they indicate a
/// misconfigured host rather than a guest-triggerable condition), kept as a
/// distinct type so callers can still match on which resource was
/// exhausted before choosing to abort.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("constant pool exhausted its {capacity}-byte budget for this block")]
    ConstantPoolFull { capacity: usize },
    #[error("executable code arena is full ({used}/{capacity} bytes)")]
    ArenaFull { used: usize, capacity: usize },
    #[error("register allocator could not find a free host location for {0:?}")]
    AllocationFailed(crate::ir::Value),
}
