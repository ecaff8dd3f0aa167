//! A dynamic binary translator for ARM (A32/T32/A64) guest code, recompiling
//! guest basic blocks into x86-64 host machine code one block at a time.
//!
//! `frontend::translate` lifts a block to [`ir::Block`], `opt::run_pipeline`
//! rewrites it through a fixed pass sequence, `backend::x64::X64Emitter`
//! allocates registers and emits host code in one pass over the result, and
//! [`jit::Jit`] ties the whole pipeline to a [`cache::BlockCache`] and a
//! [`dispatch::Runtime`] trampoline. [`mem::MemRegion`] is a demo MMU for
//! the `elfloader` binary and this crate's own tests; real embedders back
//! guest memory with their own [`external::MemoryCallbacks`] impl instead.

pub mod backend;
pub mod cache;
pub mod debug;
pub mod dispatch;
pub mod error;
pub mod external;
pub mod frontend;
pub mod guest;
pub mod ir;
pub mod jit;
pub mod loc;
pub mod mem;
pub mod monitor;
pub mod opt;

pub use jit::Jit;
pub use loc::LocationDescriptor;
