//! The `run_code` trampoline: a small hand-assembled stub that pins the
//! three host registers every emitted block expects (see
//! `backend::x64::abi`) and calls into the first compiled block, returning
//! control to Rust whenever a block's terminal hands back a
//! `ReturnToDispatch`/halt exit code.
//!
//! Grounded on the teacher's `runtime::RuntimeContext` (`Assembler`-built
//! prologue/epilogue, `CTX_CPSR`/`CTX_FASTMEM`/`CTX_REG` register pinning),
//! generalized to a calling convention where every argument actually
//! arrives in the register the System V ABI would put it in — the
//! teacher's version calls through `rsi` a function pointer the Rust side
//! passes as its sole argument (which SysV places in `rdi`); this version
//! keeps the pinned registers and the call target in the registers SysV
//! actually uses.

use dynasmrt::x64::Assembler;
use dynasmrt::{dynasm, AssemblyOffset, DynasmApi, ExecutableBuffer};

macro_rules! emit {
    ($ops:ident $($t:tt)*) => {
        dynasm!($ops
            ; .arch x64
            $($t)*
        )
    }
}

/// Exit code a compiled block leaves in `eax` before `ret`, matching
/// `backend::x64::emitter::X64Emitter::emit_terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BlockExitCode {
    ContinueDispatch = 0,
    Halt = 1,
}

impl From<usize> for BlockExitCode {
    fn from(x: usize) -> Self {
        match x {
            0 => BlockExitCode::ContinueDispatch,
            1 => BlockExitCode::Halt,
            other => panic!("unrecognised block exit code {other}"),
        }
    }
}

/// Signature of the generated trampoline: `(block_entry, regs_ptr,
/// fastmem_ptr, flags_ptr) -> exit_code`, called once per dispatch cycle
/// by [`Runtime::run_one`].
type TrampolineFn = extern "C" fn(usize, usize, usize, usize) -> usize;

/// Owns the one generated trampoline stub this crate needs; every block is
/// called through it rather than each carrying its own prologue.
pub struct Runtime {
    trampoline: TrampolineFn,
    _code: ExecutableBuffer,
}

impl Runtime {
    pub fn new() -> Self {
        let mut asm = Assembler::new().unwrap();
        emit!(asm
            ; push rbx
            ; push rbp
            ; push r12
            ; push r13
            ; push r14
            ; push r15
        );
        // SysV: rdi = block_entry, rsi = regs_ptr, rdx = fastmem_ptr,
        // rcx = flags_ptr.
        emit!(asm
            ; mov r15, rsi
            ; mov r14, rdx
            ; mov r13, rcx
            ; call rdi
        );
        emit!(asm
            ; pop r15
            ; pop r14
            ; pop r13
            ; pop r12
            ; pop rbp
            ; pop rbx
            ; ret
        );
        let code = asm.finalize().unwrap();
        let trampoline = unsafe { std::mem::transmute::<usize, TrampolineFn>(code.ptr(AssemblyOffset(0)) as usize) };
        Runtime { trampoline, _code: code }
    }

    /// Calls into one compiled block and reports why it returned.
    pub fn run_one(&self, block_entry: usize, regs_ptr: usize, fastmem_ptr: usize, flags_ptr: usize) -> BlockExitCode {
        let code = (self.trampoline)(block_entry, regs_ptr, fastmem_ptr, flags_ptr);
        BlockExitCode::from(code)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
