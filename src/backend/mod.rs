//! Host code generation: register allocation plus one concrete emitter per
//! supported host ISA.

pub mod regalloc;
pub mod x64;

use bitflags::bitflags;

use crate::ir::Block;

bitflags! {
    /// Host CPU features the backend may use to pick a cheaper lowering
    /// for an opcode. Checked once per `Jit` construction and threaded
    /// through to every emitted block, never re-probed per block.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HostFeature: u32 {
        const SSE42      = 1 << 0;
        const AVX        = 1 << 1;
        const AVX2       = 1 << 2;
        const BMI1       = 1 << 3;
        const BMI2       = 1 << 4;
        const LZCNT      = 1 << 5;
        const POPCNT     = 1 << 6;
        const FMA        = 1 << 7;
    }
}

/// One compiled block: its code plus the entry point the dispatcher should
/// jump to.
pub struct CompiledBlock {
    pub code: dynasmrt::ExecutableBuffer,
    pub entry: dynasmrt::AssemblyOffset,
    /// The source block's static guest cycle count, carried through so the
    /// dispatcher can charge it against `cycles_remaining` without
    /// re-deriving it from the cache.
    pub cycle_count: u32,
}

/// A host code generator: translates one already-optimized [`Block`] into
/// machine code. Implemented for x86-64 only in this crate; `arm64` and
/// `riscv64` are named here as the seam a future backend would fill, not as
/// working code, since this pack's teacher gives no grounding for either.
pub trait Emitter {
    fn emit(&mut self, block: &Block, features: HostFeature) -> Result<CompiledBlock, crate::error::EmitError>;
}
