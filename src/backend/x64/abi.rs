//! Host calling convention constants shared by the block emitter and the
//! dispatcher trampoline, so the two agree on which registers are pinned.
//!
//! Grounded on the teacher's `runtime::RuntimeContext` (`CTX_CPSR`,
//! `CTX_FASTMEM`, `CTX_REG`, `CALLEE_SAVE_REGS`, `CALLER_SAVE_REGS`),
//! carried over unchanged since the pinning scheme generalizes cleanly
//! from A32-only to A32+A64.

use dynasmrt::x64::Rq;

/// Holds the pointer to the active `JitState`'s CPSR/FPSCR (A32) or
/// NZCV/FPCR (A64) field for the duration of `run_code`.
pub const CTX_FLAGS: Rq = Rq::R13;
/// Holds the fastmem base: guest address 0 maps to this host address, so a
/// guest load/store lowers to a single indexed access off this register.
pub const CTX_FASTMEM: Rq = Rq::R14;
/// Holds the base of the `JitState` register file (`regs`/`ext_regs` for
/// A32, `regs`/`vecs` for A64), so `GetRegisterA32`/`SetRegisterA32` and
/// their A64 counterparts lower to a single displaced load/store.
pub const CTX_REGS: Rq = Rq::R15;

/// Registers `run_code`'s prologue saves and its epilogue restores, in
/// push order.
pub const CALLEE_SAVE_REGS: [Rq; 6] = [Rq::RBX, Rq::RBP, Rq::R12, Rq::R13, Rq::R14, Rq::R15];
pub const CALLEE_SAVE_SIZE: usize = CALLEE_SAVE_REGS.len() * std::mem::size_of::<usize>();

/// Registers a block is free to clobber without saving/restoring, since
/// nothing above `run_code` on the host stack depends on them surviving a
/// block call.
pub const CALLER_SAVE_REGS: [Rq; 7] =
    [Rq::RAX, Rq::RCX, Rq::RDX, Rq::R8, Rq::R9, Rq::R10, Rq::R11];

/// Spill slots a compiled block's own stack frame reserves, matching
/// `backend::regalloc::MAX_SPILL_SLOTS`. Each block emits its own
/// `sub rsp, SPILL_FRAME_SIZE` on entry and `add rsp, SPILL_FRAME_SIZE`
/// before every exit, rather than relying on space the trampoline reserves,
/// since the trampoline's frame sits behind the `call`-pushed return address
/// and can't double as the block's own spill area.
pub const SPILL_SLOT_COUNT: usize = crate::backend::regalloc::MAX_SPILL_SLOTS;
pub const SPILL_FRAME_SIZE: i32 = (SPILL_SLOT_COUNT * 8) as i32;
